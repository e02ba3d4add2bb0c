//! Instruction word layout for the RISC1.
//!
//! Every instruction is one little-endian 32-bit word:
//!
//! ```text
//!  31                          8 7          0
//! +-----------------------------+------------+
//! |        operand (24 bits)    | opcode (8) |
//! +-----------------------------+------------+
//! ```
//!
//! The operand is either a raw unsigned immediate (mnemonics ending in `i`)
//! or a packed register triple:
//!
//! ```text
//!  23        16 15         8 7          0
//! +------------+------------+------------+
//! |   imm (8)  |  ry sel    |  rx sel    |
//! +------------+------------+------------+
//! ```
//!
//! A selector byte of 0 means "no register"; N > 0 selects register N-1.
//! An immediate byte of 0 means "no immediate".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine word size in bytes.
pub const WORD_SIZE: u32 = 4;

/// Mask of the 24-bit operand field.
pub const OPERAND_MASK: u32 = 0x00FF_FFFF;

/// Split an instruction word into `(opcode, raw operand)`.
#[inline]
pub fn decode(word: u32) -> (u8, u32) {
    ((word & 0xFF) as u8, word >> 8)
}

/// Pack an opcode and operand into an instruction word.
/// The operand is clipped to 24 bits.
#[inline]
pub fn encode(opcode: u8, operand: u32) -> u32 {
    u32::from(opcode) | ((operand & OPERAND_MASK) << 8)
}

/// Unpacked register-triple operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Operands {
    pub rx: Option<u8>,
    pub ry: Option<u8>,
    pub imm: Option<u8>,
}

impl Operands {
    /// Pack back into a 24-bit operand field.
    pub fn pack(&self) -> u32 {
        let sel = |r: Option<u8>| r.map_or(0, |r| u32::from(r) + 1);
        sel(self.rx) | (sel(self.ry) << 8) | (u32::from(self.imm.unwrap_or(0)) << 16)
    }
}

/// Interpret a raw operand as a register triple.
///
/// Register 255 cannot be selected: selector byte 255 names register 254.
pub fn solve_operand(raw: u32) -> Operands {
    let reg = |byte: u32| match byte & 0xFF {
        0 => None,
        n => Some((n - 1) as u8),
    };
    let imm = ((raw >> 16) & 0xFF) as u8;
    Operands {
        rx: reg(raw),
        ry: reg(raw >> 8),
        imm: (imm > 0).then_some(imm),
    }
}

macro_rules! opcodes {
    ($($variant:ident = $value:literal => $mnemonic:literal,)*) => {
        /// Every opcode the assembler knows about.
        ///
        /// Not every opcode is executable: the CPU dispatch table decides
        /// which ones are claimed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $value,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00 => "NOP",
    Load8i = 0x01 => "LOAD8i",
    Load16i = 0x02 => "LOAD16i",
    Load32i = 0x03 => "LOAD32i",
    Store8i = 0x04 => "STORE8i",
    Store16i = 0x05 => "STORE16i",
    Store32i = 0x06 => "STORE32i",
    Load8 = 0x07 => "LOAD8",
    Load16 = 0x08 => "LOAD16",
    Load32 = 0x09 => "LOAD32",
    Store8 = 0x0B => "STORE8",
    Store16 = 0x0C => "STORE16",
    Store32 = 0x0D => "STORE32",
    LoadAddri = 0x0F => "LOADADDRi",
    Add = 0x10 => "ADD",
    Sub = 0x11 => "SUB",
    Mul = 0x12 => "MUL",
    Div = 0x13 => "DIV",
    Mod = 0x14 => "MOD",
    Shl = 0x15 => "SHL",
    Shr = 0x16 => "SHR",
    And = 0x17 => "AND",
    Or = 0x18 => "OR",
    Xor = 0x19 => "XOR",
    Not = 0x20 => "NOT",
    Push = 0x21 => "PUSH",
    Pop = 0x22 => "POP",
    Mov = 0x23 => "MOV",
    Movi = 0x24 => "MOVi",
    Swp = 0x25 => "SWP",
    Map = 0x2D => "MAP",
    Start = 0x2E => "START",
    Intvec = 0x2F => "INTVEC",
    Bi = 0x30 => "Bi",
    B = 0x31 => "B",
    Bzi = 0x32 => "BZi",
    Bz = 0x33 => "BZ",
    Bnzi = 0x34 => "BNZi",
    Bnz = 0x35 => "BNZ",
    Be = 0x36 => "BE",
    Bne = 0x37 => "BNE",
    Ble = 0x38 => "BLE",
    Bsubi = 0x3A => "BSUBi",
    Bsub = 0x3B => "BSUB",
    Bret = 0x3C => "BRET",
    Iret = 0x3D => "IRET",
    Seti = 0x3E => "SETI",
    Clri = 0x3F => "CLRI",
    Co = 0x40 => "CO",
    Cos = 0x41 => "COS",
    Coq = 0x42 => "COQ",
    Coh = 0x43 => "COH",
    Stop = 0xFF => "STOP",
}

/// Shorthand mnemonics accepted by the assembler.
const ALIASES: &[(&str, Opcode)] = &[
    ("LOADI", Opcode::Load32i),
    ("STOREI", Opcode::Store32i),
    ("LOAD", Opcode::Load32),
    ("STORE", Opcode::Store32),
];

impl Opcode {
    /// Look up a mnemonic (case-insensitive), including aliases.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == upper)
            .map(|(_, op)| *op)
            .or_else(|| {
                Opcode::ALL
                    .iter()
                    .copied()
                    .find(|op| op.mnemonic().eq_ignore_ascii_case(&upper))
            })
    }

    /// Whether the operand field is a single raw immediate.
    pub fn takes_immediate(self) -> bool {
        self.mnemonic().ends_with('i')
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A fetched instruction word, split into its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u8,
    pub operand: u32,
}

impl Instruction {
    pub fn from_word(word: u32) -> Self {
        let (opcode, operand) = decode(word);
        Self { opcode, operand }
    }

    pub fn to_word(self) -> u32 {
        encode(self.opcode, self.operand)
    }

    pub fn op(self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    pub fn operands(self) -> Operands {
        solve_operand(self.operand)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.op() else {
            return write!(f, "??? 0x{:08X}", self.to_word());
        };
        if op.takes_immediate() {
            return write!(f, "{} 0x{:X}", op, self.operand);
        }
        let ops = self.operands();
        let reg = |r: Option<u8>| r.map_or_else(|| "0".to_string(), |r| format!("r{}", r));
        match (ops.rx, ops.ry, ops.imm) {
            (None, None, None) => write!(f, "{}", op),
            (rx, None, None) => write!(f, "{} {}", op, reg(rx)),
            (rx, ry, None) => write!(f, "{} {}, {}", op, reg(rx), reg(ry)),
            (rx, ry, Some(imm)) => write!(f, "{} {}, {}, {}", op, reg(rx), reg(ry), imm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_splits_fields() {
        assert_eq!(decode(0x0005_0110), (0x10, 0x0501));
        assert_eq!(decode(0xFFFF_FFFF), (0xFF, 0x00FF_FFFF));
    }

    #[test]
    fn test_encode_clips_operand() {
        assert_eq!(encode(0x24, 0x1_2345_67), 0x2345_6724);
    }

    #[test]
    fn test_solve_operand_sentinels() {
        let ops = solve_operand(0x05_02_00);
        assert_eq!(ops.rx, None);
        assert_eq!(ops.ry, Some(1));
        assert_eq!(ops.imm, Some(5));

        let ops = solve_operand(0x00_00_FF);
        assert_eq!(ops.rx, Some(254));
        assert_eq!(ops.ry, None);
        assert_eq!(ops.imm, None);
    }

    #[test]
    fn test_immediate_is_unsigned() {
        assert_eq!(solve_operand(0xFF_00_00).imm, Some(255));
    }

    #[test]
    fn test_mnemonic_lookup() {
        assert_eq!(Opcode::from_mnemonic("movi"), Some(Opcode::Movi));
        assert_eq!(Opcode::from_mnemonic("LOADi"), Some(Opcode::Load32i));
        assert_eq!(Opcode::from_mnemonic("store"), Some(Opcode::Store32));
        assert_eq!(Opcode::from_mnemonic("BOGUS"), None);
        assert!(Opcode::Bsubi.takes_immediate());
        assert!(!Opcode::Bsub.takes_immediate());
    }

    #[test]
    fn test_opcode_table_is_consistent() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(*op as u8), Some(*op));
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        assert_eq!(Opcode::from_u8(0x0A), None);
    }

    #[test]
    fn test_instruction_display() {
        let add = Instruction { opcode: Opcode::Add as u8, operand: 0x05_01_02 };
        assert_eq!(add.to_string(), "ADD r1, r0, 5");
        let movi = Instruction { opcode: Opcode::Movi as u8, operand: 0x2A };
        assert_eq!(movi.to_string(), "MOVi 0x2A");
        let stop = Instruction::from_word(0xFF);
        assert_eq!(stop.to_string(), "STOP");
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(word in any::<u32>()) {
            let (opcode, operand) = decode(word);
            prop_assert_eq!(encode(opcode, operand), word);
        }

        #[test]
        fn prop_operand_pack_roundtrip(raw in 0u32..=OPERAND_MASK) {
            prop_assert_eq!(solve_operand(raw).pack(), raw);
        }
    }
}
