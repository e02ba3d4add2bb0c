//! Disassembler for RISC1 programs.
//!
//! Output reassembles to the same words: unknown opcodes and trailing bytes
//! are emitted as data.

use crate::asm::image::Image;
use crate::cpu::decode::Instruction;

/// Disassemble a single instruction word to text.
pub fn disassemble_instruction(word: u32) -> String {
    let instr = Instruction::from_word(word);
    match instr.op() {
        Some(_) => instr.to_string(),
        None => format!("DD 0x{:08X}", word),
    }
}

/// Disassemble a code section loaded at address 0.
pub fn disassemble(code: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("# RISC1 Disassembly\n");
    output.push_str("# -----------------\n\n");

    let words = code.chunks_exact(4);
    let tail = words.remainder();
    for (i, w) in words.enumerate() {
        let word = u32::from_le_bytes([w[0], w[1], w[2], w[3]]);
        output.push_str(&format!(
            "{:<24} # {:06x}: {:08x}\n",
            disassemble_instruction(word),
            i * 4,
            word
        ));
    }
    for byte in tail {
        output.push_str(&format!("DB 0x{:02X}\n", byte));
    }

    output
}

/// Disassemble an image: code listing, then the data section.
pub fn disassemble_image(image: &Image) -> String {
    let mut output = disassemble(&image.code);
    if !image.data.is_empty() {
        output.push_str(&format!("\n.data\n.base 0x{:X}\n", image.data_base));
        for byte in &image.data {
            output.push_str(&format!("DB 0x{:02X}\n", byte));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::assemble;
    use crate::cpu::decode::{encode, Opcode};

    #[test]
    fn test_disassemble_stop() {
        assert_eq!(disassemble_instruction(0xFF), "STOP");
    }

    #[test]
    fn test_disassemble_add() {
        let add = encode(Opcode::Add as u8, 0x05_01_02);
        assert_eq!(disassemble_instruction(add), "ADD r1, r0, 5");
    }

    #[test]
    fn test_disassemble_unknown() {
        assert_eq!(disassemble_instruction(0x1234_560A), "DD 0x1234560A");
    }

    #[test]
    fn test_listing_reassembles() {
        let source = "MOVi 0x41\nSTORE8i 0x8010\nMOV 0, r3, 7\nPUSH r1\nBi 0\nSTOP\n.data\n.base 0x40\nDB 9";
        let program = assemble(source).unwrap();
        let listing = disassemble_image(&program.clone().into());
        let again = assemble(&listing).unwrap();
        assert_eq!(again.code, program.code);
        assert_eq!(again.data, program.data);
        assert_eq!(again.data_base, program.data_base);
    }

    #[test]
    fn test_trailing_bytes() {
        let listing = disassemble(&[0xFF, 0, 0, 0, 0x07]);
        assert!(listing.contains("STOP"));
        assert!(listing.contains("DB 0x07"));
    }
}
