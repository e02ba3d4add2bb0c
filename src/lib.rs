//! # RISC1 Emulator
//!
//! An emulator for RISC1, a 32-bit word machine with 256 registers, a sparse
//! paged address space, an optional multi-level MMU and a vectored interrupt
//! controller.
//!
//! The crate is split into the CPU core ([`cpu`]), program tooling ([`asm`]),
//! peripherals ([`sysio`]) and a [`machine`] that wires them together from a
//! [`config::MachineConfig`].

pub mod asm;
pub mod config;
pub mod cpu;
pub mod machine;
pub mod sysio;

// Re-export commonly used types
pub use asm::{assemble, disassemble, load_image, save_image, AssemblerError, Image, ImageError};
pub use config::{ConfigError, MachineConfig};
pub use cpu::{AddressSpace, Cpu, CpuError, CpuState, Instruction, Memory, MemoryError, Registers};
pub use machine::{Machine, MachineError};
