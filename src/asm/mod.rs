//! Assembler, disassembler and image format for RISC1 programs.
//!
//! This module provides:
//! - A two-pass assembler (text → code and data sections)
//! - The RE01 executable image format
//! - A disassembler (words → reassemblable text)

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, AssemblerError, Program};
pub use disasm::{disassemble, disassemble_image};
pub use image::{load_image, save_image, Image, ImageError};
