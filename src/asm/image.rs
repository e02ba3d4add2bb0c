//! RE01 executable images.
//!
//! Layout, all integers little-endian:
//! ```text
//! offset 0   "RE01"
//! offset 4   u32  file offset of the data section (12 + code length)
//! offset 8   u32  load address of the data section
//! offset 12  code bytes, loaded at address 0
//!            data bytes, loaded at the data base
//! ```

use crate::cpu::memory::{AddressSpace, MemoryError};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Image magic.
pub const MAGIC: [u8; 4] = *b"RE01";

/// Header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// A loaded RE01 image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Image {
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    pub data_base: u32,
}

impl Image {
    /// Parse an image from raw file contents.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ImageError::Truncated(bytes.len()));
        }
        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(ImageError::BadMagic(magic));
        }
        let data_pos = read_u32(&bytes[4..8]) as usize;
        let data_base = read_u32(&bytes[8..12]);
        if data_pos < HEADER_SIZE || data_pos > bytes.len() {
            return Err(ImageError::BadDataOffset { offset: data_pos, len: bytes.len() });
        }

        Ok(Self {
            code: bytes[HEADER_SIZE..data_pos].to_vec(),
            data: bytes[data_pos..].to_vec(),
            data_base,
        })
    }

    /// Serialize to the on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let data_pos = (HEADER_SIZE + self.code.len()) as u32;
        let mut out = Vec::with_capacity(data_pos as usize + self.data.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&data_pos.to_le_bytes());
        out.extend_from_slice(&self.data_base.to_le_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&self.data);
        out
    }

    /// Copy code to address 0 and data to the data base.
    pub fn load_into(&self, mem: &mut AddressSpace) -> Result<(), MemoryError> {
        mem.load(0, &self.code)?;
        mem.load(self.data_base, &self.data)?;
        log::debug!(
            "loaded {} code bytes, {} data bytes at {:#x}",
            self.code.len(),
            self.data.len(),
            self.data_base
        );
        Ok(())
    }

    /// Whole code words with their addresses. Trailing bytes are skipped.
    pub fn code_words(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.code
            .chunks_exact(4)
            .enumerate()
            .map(|(i, w)| ((i * 4) as u32, read_u32(w)))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Load an image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
    let bytes = std::fs::read(path.as_ref()).map_err(|e| ImageError::IoError(e.to_string()))?;
    Image::parse(&bytes)
}

/// Save an image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &Image) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), image.to_bytes()).map_err(|e| ImageError::IoError(e.to_string()))
}

/// Errors that can occur during image operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("image truncated: {0} bytes, header needs 12")]
    Truncated(usize),

    #[error("bad magic {0:?}, expected \"RE01\"")]
    BadMagic([u8; 4]),

    #[error("data offset {offset} outside image of {len} bytes")]
    BadDataOffset { offset: usize, len: usize },
}
