//! CPU emulation for the RISC1.
//!
//! This module implements the RISC1 architecture:
//! - 256 general 32-bit registers, with PC, SP and return address at fixed indices
//! - byte-addressable memory behind an optional paging MMU
//! - a single-word instruction format with an 8-bit opcode and 24-bit operand
//! - vectored, edge-triggered interrupts

pub mod alu;
pub mod decode;
pub mod execute;
pub mod intvec;
pub mod memory;
pub mod mmu;
pub mod registers;
pub mod stack;

pub use alu::AluError;
pub use decode::{Instruction, Opcode, Operands};
pub use execute::{Cpu, CpuError, CpuState, Snapshot};
pub use intvec::{InterruptLine, InterruptVector};
pub use memory::{AddressSpace, Device, Memory, MemoryError, SubMemory};
pub use mmu::{Mapping, Mmu, PageFlags};
pub use registers::Registers;
pub use stack::{Stack, StackError};
