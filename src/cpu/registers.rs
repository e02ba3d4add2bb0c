//! RISC1 register file.
//!
//! 256 general 32-bit registers. A few indices are reserved by convention,
//! but they are ordinary registers as far as the instruction set goes:
//! - r0: accumulator, the implicit target/operand of most instructions
//! - r252: return address (subroutines and interrupts)
//! - r253: stack pointer
//! - r254: program counter

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Number of register slots.
pub const REGISTER_COUNT: usize = 256;

/// Accumulator.
pub const ACC: u8 = 0;
/// Return-address register.
pub const REG_RA: u8 = 252;
/// Stack pointer.
pub const REG_SP: u8 = 253;
/// Program counter.
pub const REG_PC: u8 = 254;

/// The register file.
#[derive(Clone, PartialEq, Eq)]
pub struct Registers {
    regs: [u32; REGISTER_COUNT],
}

impl Registers {
    /// Create a new register file with all values zeroed.
    pub fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
        }
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        self.regs = [0; REGISTER_COUNT];
    }

    #[inline]
    pub fn get(&self, index: u8) -> u32 {
        self.regs[index as usize]
    }

    #[inline]
    pub fn set(&mut self, index: u8, value: u32) {
        self.regs[index as usize] = value;
    }

    /// Value of an optional register, or `default` when absent.
    #[inline]
    pub fn value_or(&self, index: Option<u8>, default: u32) -> u32 {
        index.map_or(default, |r| self.get(r))
    }

    #[inline]
    pub fn acc(&self) -> u32 {
        self.get(ACC)
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.get(REG_PC)
    }

    /// Set the program counter to an absolute address.
    #[inline]
    pub fn jump(&mut self, addr: u32) {
        self.set(REG_PC, addr);
    }

    /// Advance the program counter by `step` bytes.
    /// Returns the old value.
    pub fn advance_pc(&mut self, step: u32) -> u32 {
        let old = self.pc();
        self.jump(old.wrapping_add(step));
        old
    }

    /// Iterate over registers holding a non-zero value.
    pub fn non_zero(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.regs
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(i, v)| (i as u8, *v))
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.non_zero().map(|(i, v)| (format!("r{}", i), v)))
            .finish()
    }
}

// Only non-zero registers are emitted; a full 256-entry dump is noise.
impl Serialize for Registers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (index, value) in self.non_zero() {
            map.serialize_entry(&format!("r{}", index), &value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_registers_are_ordinary() {
        let mut regs = Registers::new();
        regs.set(REG_SP, 0x1000);
        regs.jump(0x40);
        assert_eq!(regs.get(REG_SP), 0x1000);
        assert_eq!(regs.get(REG_PC), 0x40);
        assert_eq!(regs.pc(), 0x40);
    }

    #[test]
    fn test_advance_pc() {
        let mut regs = Registers::new();
        regs.jump(10);

        let old = regs.advance_pc(4);
        assert_eq!(old, 10);
        assert_eq!(regs.pc(), 14);
    }

    #[test]
    fn test_advance_pc_wraps() {
        let mut regs = Registers::new();
        regs.jump(u32::MAX - 1);
        regs.advance_pc(4);
        assert_eq!(regs.pc(), 2);
    }

    #[test]
    fn test_value_or_default() {
        let mut regs = Registers::new();
        regs.set(3, 77);
        assert_eq!(regs.value_or(Some(3), 9), 77);
        assert_eq!(regs.value_or(None, 9), 9);
    }

    #[test]
    fn test_non_zero_and_serialize() {
        let mut regs = Registers::new();
        regs.set(ACC, 15);
        regs.set(1, 23);
        let dump: Vec<_> = regs.non_zero().collect();
        assert_eq!(dump, vec![(0, 15), (1, 23)]);

        let json = serde_json::to_string(&regs).unwrap();
        assert_eq!(json, r#"{"r0":15,"r1":23}"#);
    }
}
