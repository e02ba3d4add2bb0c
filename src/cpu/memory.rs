//! RISC1 address space.
//!
//! Byte-addressable storage, allocated lazily in 4 KiB pages. Pages that were
//! never written read as zero. Single addresses can be bound to a [`Device`],
//! which then sees every access to that address instead of the backing store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Allocation unit of the backing store.
pub const PAGE_SIZE: usize = 4096;

const PAGE_MASK: u32 = !(PAGE_SIZE as u32 - 1);

/// A memory-mapped peripheral.
///
/// Devices are shared with whoever created them (the screen of a terminal is
/// observable from outside), so both methods take `&self`.
pub trait Device: Send + Sync {
    fn get(&self, addr: u32) -> u8;
    fn set(&self, addr: u32, value: u8);
}

/// Byte-level access shared by every memory view.
///
/// `get_data`/`set_data` compose little-endian values out of raw accesses, so
/// a multi-byte store that touches a device address still reaches the device.
pub trait Memory {
    fn get_raw(&self, pos: u32) -> Result<u8, MemoryError>;
    fn set_raw(&mut self, pos: u32, value: u8) -> Result<(), MemoryError>;

    /// Read `size` bytes (1, 2, 4 or 8) as a little-endian value.
    fn get_data(&self, pos: u32, size: usize) -> Result<u64, MemoryError> {
        check_size(size)?;
        let mut value = 0u64;
        for i in 0..size {
            let byte = self.get_raw(offset(pos, i)?)?;
            value |= u64::from(byte) << (8 * i);
        }
        Ok(value)
    }

    /// Write the low `size` bytes (1, 2, 4 or 8) of `value`, little-endian.
    fn set_data(&mut self, pos: u32, value: u64, size: usize) -> Result<(), MemoryError> {
        check_size(size)?;
        for i in 0..size {
            self.set_raw(offset(pos, i)?, (value >> (8 * i)) as u8)?;
        }
        Ok(())
    }
}

fn check_size(size: usize) -> Result<(), MemoryError> {
    match size {
        1 | 2 | 4 | 8 => Ok(()),
        _ => Err(MemoryError::InvalidAccessSize(size)),
    }
}

fn offset(pos: u32, i: usize) -> Result<u32, MemoryError> {
    pos.checked_add(i as u32)
        .ok_or(MemoryError::AddressOutOfRange { pos: u64::from(pos) + i as u64, size: 1 << 32 })
}

/// How the address space reacts to accesses past its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sizing {
    /// Accesses at or past `size` fail.
    Fixed(u32),
    /// Writes past the end grow the space; reads past it fail.
    Auto,
}

/// One page-sized chunk returned by [`AddressSpace::get_block`].
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    /// Page-aligned base address.
    pub base: u32,
    /// `None` when the page was never allocated (reads as zeros).
    pub data: Option<&'a [u8; PAGE_SIZE]>,
}

/// Sparse paged memory with optional device bindings.
pub struct AddressSpace {
    pages: BTreeMap<u32, Box<[u8; PAGE_SIZE]>>,
    sizing: Sizing,
    /// High-water mark in auto mode, capacity in fixed mode.
    size: u64,
    specials: HashMap<u32, Arc<dyn Device>>,
}

impl AddressSpace {
    /// Create a fixed-size address space of `size` bytes.
    pub fn new(size: u32) -> Self {
        Self {
            pages: BTreeMap::new(),
            sizing: Sizing::Fixed(size),
            size: u64::from(size),
            specials: HashMap::new(),
        }
    }

    /// Create an address space that grows on writes.
    pub fn auto_sized() -> Self {
        Self {
            pages: BTreeMap::new(),
            sizing: Sizing::Auto,
            size: 0,
            specials: HashMap::new(),
        }
    }

    pub fn sizing(&self) -> Sizing {
        self.sizing
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of pages actually allocated.
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Bind `addr` to a device.
    ///
    /// An address can carry at most one binding.
    pub fn add_special(&mut self, addr: u32, device: Arc<dyn Device>) -> Result<(), MemoryError> {
        if self.specials.contains_key(&addr) {
            return Err(MemoryError::DuplicateBinding(addr));
        }
        self.specials.insert(addr, device);
        Ok(())
    }

    pub fn is_special(&self, addr: u32) -> bool {
        self.specials.contains_key(&addr)
    }

    fn check_read(&self, pos: u32) -> Result<(), MemoryError> {
        if u64::from(pos) >= self.size {
            return Err(MemoryError::AddressOutOfRange { pos: u64::from(pos), size: self.size });
        }
        Ok(())
    }

    fn check_write(&mut self, pos: u32) -> Result<(), MemoryError> {
        let end = u64::from(pos) + 1;
        match self.sizing {
            Sizing::Auto if end > self.size => {
                self.size = end;
                Ok(())
            }
            _ => self.check_read(pos),
        }
    }

    fn page(&self, pos: u32) -> Option<&[u8; PAGE_SIZE]> {
        self.pages.get(&(pos & PAGE_MASK)).map(|p| p.as_ref())
    }

    fn page_mut(&mut self, pos: u32) -> &mut [u8; PAGE_SIZE] {
        self.pages
            .entry(pos & PAGE_MASK)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]))
    }

    /// Page-aligned chunks covering `[pos, pos + size)`.
    ///
    /// Bypasses device bindings; meant for bulk scans such as page-table reads.
    pub fn get_block(&self, pos: u32, size: u32) -> Result<Vec<Block<'_>>, MemoryError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let end = u64::from(pos) + u64::from(size);
        if end > self.size {
            return Err(MemoryError::AddressOutOfRange { pos: end - 1, size: self.size });
        }
        let first = u64::from(pos & PAGE_MASK);
        let blocks = (first..end)
            .step_by(PAGE_SIZE)
            .map(|base| {
                let base = base as u32;
                Block { base, data: self.page(base) }
            })
            .collect();
        Ok(blocks)
    }

    /// Copy `buf.len()` bytes starting at `pos` out of the backing store.
    pub fn read_bytes(&self, pos: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let start = u64::from(pos);
        let end = start + buf.len() as u64;
        for block in self.get_block(pos, buf.len() as u32)? {
            let page_start = u64::from(block.base);
            let lo = start.max(page_start);
            let hi = end.min(page_start + PAGE_SIZE as u64);
            let dst = &mut buf[(lo - start) as usize..(hi - start) as usize];
            match block.data {
                Some(page) => dst.copy_from_slice(&page[(lo - page_start) as usize..(hi - page_start) as usize]),
                None => dst.fill(0),
            }
        }
        Ok(())
    }

    /// Bulk-write `bytes` starting at `pos`, honouring device bindings.
    pub fn load(&mut self, pos: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        for (i, byte) in bytes.iter().enumerate() {
            self.set_raw(offset(pos, i)?, *byte)?;
        }
        Ok(())
    }

    /// Drop every page; device bindings are kept.
    pub fn clear(&mut self) {
        self.pages.clear();
        if self.sizing == Sizing::Auto {
            self.size = 0;
        }
    }
}

impl Memory for AddressSpace {
    fn get_raw(&self, pos: u32) -> Result<u8, MemoryError> {
        if let Some(device) = self.specials.get(&pos) {
            return Ok(device.get(pos));
        }
        self.check_read(pos)?;
        Ok(self.page(pos).map_or(0, |p| p[pos as usize % PAGE_SIZE]))
    }

    fn set_raw(&mut self, pos: u32, value: u8) -> Result<(), MemoryError> {
        if let Some(device) = self.specials.get(&pos) {
            device.set(pos, value);
            return Ok(());
        }
        self.check_write(pos)?;
        self.page_mut(pos)[pos as usize % PAGE_SIZE] = value;
        Ok(())
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::auto_sized()
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("sizing", &self.sizing)
            .field("size", &self.size)
            .field("allocated_pages", &self.pages.len())
            .field("specials", &self.specials.len())
            .finish()
    }
}

/// A window onto another memory at a fixed offset.
///
/// Every access is forwarded to the parent at `offset + pos`. With a limit
/// set, positions past the limit fail without reaching the parent.
pub struct SubMemory<'a, M: Memory + ?Sized> {
    parent: &'a mut M,
    offset: u32,
    limit: Option<u32>,
}

impl<'a, M: Memory + ?Sized> SubMemory<'a, M> {
    pub fn new(parent: &'a mut M, offset: u32) -> Self {
        Self { parent, offset, limit: None }
    }

    pub fn with_limit(parent: &'a mut M, offset: u32, limit: u32) -> Self {
        Self { parent, offset, limit: Some(limit) }
    }

    fn translate(&self, pos: u32) -> Result<u32, MemoryError> {
        if let Some(limit) = self.limit {
            if pos > limit {
                return Err(MemoryError::AddressOutOfRange { pos: u64::from(pos), size: u64::from(limit) + 1 });
            }
        }
        self.offset
            .checked_add(pos)
            .ok_or(MemoryError::AddressOutOfRange { pos: u64::from(self.offset) + u64::from(pos), size: 1 << 32 })
    }
}

impl<M: Memory + ?Sized> Memory for SubMemory<'_, M> {
    fn get_raw(&self, pos: u32) -> Result<u8, MemoryError> {
        self.parent.get_raw(self.translate(pos)?)
    }

    fn set_raw(&mut self, pos: u32, value: u8) -> Result<(), MemoryError> {
        let pos = self.translate(pos)?;
        self.parent.set_raw(pos, value)
    }
}

/// Errors raised by the memory subsystem, including address translation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("address {pos:#x} out of range (size {size:#x})")]
    AddressOutOfRange { pos: u64, size: u64 },

    #[error("address {0:#x} already bound to a device")]
    DuplicateBinding(u32),

    #[error("invalid access size {0} (expected 1, 2, 4 or 8)")]
    InvalidAccessSize(usize),

    #[error("no page mapping covers address {0:#x}")]
    UnmappedPage(u32),

    #[error("page table nesting deeper than {0} levels")]
    PageTableTooDeep(usize),

    #[error("page table expansion reads more than {0} entries")]
    PageTableTooLarge(usize),
}
