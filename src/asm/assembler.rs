//! Two-pass assembler for RISC1 programs.
//!
//! Syntax:
//! ```text
//! # Comment
//! .code                   # code section (default)
//! start:  MOVi 0x41       # `i` mnemonics take one 24-bit immediate
//!         ADD r1, r0, 5   # others take rx, ry, imm; `0` leaves a register out
//!         Bi .            # `.` is the address of the current instruction
//!
//! .data
//! .base 0x200             # data load address (default: end of code)
//! count:  DD 10           # DB/DW/DD/DQ: 1/2/4/8-byte values
//! msg:    DT "Hello"      # NUL-terminated string
//! ```
//!
//! Pass one sizes every statement and collects labels; pass two encodes.

use crate::asm::image::Image;
use crate::cpu::decode::{encode, Opcode, Operands, OPERAND_MASK, WORD_SIZE};
use std::collections::BTreeMap;
use thiserror::Error;

/// Assembled output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Code section, loaded at address 0.
    pub code: Vec<u8>,
    /// Data section, loaded at `data_base`.
    pub data: Vec<u8>,
    pub data_base: u32,
    /// Label addresses.
    pub labels: BTreeMap<String, u32>,
}

impl From<Program> for Image {
    fn from(program: Program) -> Self {
        Image {
            code: program.code,
            data: program.data,
            data_base: program.data_base,
        }
    }
}

/// Assemble source text.
pub fn assemble(source: &str) -> Result<Program, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Code,
    Data,
}

/// One sized statement, waiting for pass two.
#[derive(Debug)]
enum Stmt<'s> {
    Instr { op: Opcode, args: &'s str },
    Value { size: usize, expr: &'s str },
    Bytes(Vec<u8>),
}

#[derive(Debug)]
struct Pending<'s> {
    stmt: Stmt<'s>,
    section: Section,
    /// Offset within the section.
    offset: u32,
    line: usize,
}

/// The assembler state.
struct Assembler<'s> {
    section: Section,
    /// Current code offset.
    pc: u32,
    /// Current data offset, relative to the data base.
    dpc: u32,
    base: Option<u32>,
    /// Label -> (section, offset).
    symbols: BTreeMap<String, (Section, u32)>,
    pending: Vec<Pending<'s>>,
}

impl<'s> Assembler<'s> {
    fn new() -> Self {
        Self {
            section: Section::Code,
            pc: 0,
            dpc: 0,
            base: None,
            symbols: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &'s str) -> Result<Program, AssemblerError> {
        // Pass 1: size statements and collect labels
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: encode
        let data_base = self.base.unwrap_or(self.pc);
        let labels: BTreeMap<String, u32> = self
            .symbols
            .iter()
            .map(|(name, (section, offset))| {
                let addr = match section {
                    Section::Code => *offset,
                    Section::Data => data_base.wrapping_add(*offset),
                };
                (name.clone(), addr)
            })
            .collect();

        let mut code = Vec::with_capacity(self.pc as usize);
        let mut data = Vec::with_capacity(self.dpc as usize);
        for item in &self.pending {
            let (out, pos) = match item.section {
                Section::Code => (&mut code, item.offset),
                Section::Data => (&mut data, data_base.wrapping_add(item.offset)),
            };
            let ctx = Context { labels: &labels, pos, line: item.line };
            match &item.stmt {
                Stmt::Instr { op, args } => {
                    let word = ctx.encode_instruction(*op, args)?;
                    out.extend_from_slice(&word.to_le_bytes());
                }
                Stmt::Value { size, expr } => {
                    let value = ctx.data_value(expr, *size)?;
                    out.extend_from_slice(&value.to_le_bytes()[..*size]);
                }
                Stmt::Bytes(bytes) => out.extend_from_slice(bytes),
            }
        }

        log::debug!(
            "assembled {} code bytes, {} data bytes at {:#x}, {} labels",
            code.len(),
            data.len(),
            data_base,
            labels.len()
        );
        Ok(Program { code, data, data_base, labels })
    }

    fn process_line(&mut self, line: &'s str, line_num: usize) -> Result<(), AssemblerError> {
        let line = strip_comment(line).trim();

        if line.is_empty() {
            return Ok(());
        }

        // Directives
        if let Some(directive) = line.strip_prefix('.') {
            let mut parts = directive.split_whitespace();
            match parts.next().map(str::to_ascii_lowercase).as_deref() {
                Some("code") => self.section = Section::Code,
                Some("data") => self.section = Section::Data,
                Some("base") => {
                    let value = parts.next().ok_or_else(|| syntax(line_num, ".base requires an address"))?;
                    let base = parse_number(value).ok_or_else(|| syntax(line_num, format!("invalid address '{}'", value)))?;
                    self.base = Some(fit(base, 32, line_num)?);
                }
                _ => return Err(syntax(line_num, format!("unknown directive '{}'", line))),
            }
            return Ok(());
        }

        // Check for label definition
        let line = match line.split_once(':') {
            Some((label, rest)) if is_identifier(label.trim()) => {
                self.define_label(label.trim(), line_num)?;
                rest.trim()
            }
            _ => line,
        };

        if line.is_empty() {
            return Ok(());
        }

        self.process_statement(line, line_num)
    }

    fn define_label(&mut self, label: &str, line_num: usize) -> Result<(), AssemblerError> {
        let offset = match self.section {
            Section::Code => self.pc,
            Section::Data => self.dpc,
        };
        if self.symbols.insert(label.to_string(), (self.section, offset)).is_some() {
            return Err(AssemblerError::DuplicateLabel { line: line_num, label: label.to_string() });
        }
        Ok(())
    }

    fn process_statement(&mut self, line: &'s str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, args) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (line, ""),
        };

        let stmt = match mnemonic.to_ascii_uppercase().as_str() {
            "DB" => Stmt::Value { size: 1, expr: args },
            "DW" => Stmt::Value { size: 2, expr: args },
            "DD" => Stmt::Value { size: 4, expr: args },
            "DQ" => Stmt::Value { size: 8, expr: args },
            "DT" => Stmt::Bytes(parse_text(args, line_num)?),
            _ => {
                let op = Opcode::from_mnemonic(mnemonic).ok_or_else(|| AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic: mnemonic.to_string(),
                })?;
                if self.section == Section::Data {
                    return Err(syntax(line_num, format!("instruction '{}' in data section", mnemonic)));
                }
                Stmt::Instr { op, args }
            }
        };

        let size = match &stmt {
            Stmt::Instr { .. } => WORD_SIZE,
            Stmt::Value { size, .. } => *size as u32,
            Stmt::Bytes(bytes) => bytes.len() as u32,
        };
        let counter = match self.section {
            Section::Code => &mut self.pc,
            Section::Data => &mut self.dpc,
        };
        let offset = *counter;
        *counter += size;
        self.pending.push(Pending { stmt, section: self.section, offset, line: line_num });
        Ok(())
    }
}

/// What pass two needs to resolve one statement.
struct Context<'a> {
    labels: &'a BTreeMap<String, u32>,
    /// Address of the statement itself, for `.`.
    pos: u32,
    line: usize,
}

impl Context<'_> {
    fn encode_instruction(&self, op: Opcode, args: &str) -> Result<u32, AssemblerError> {
        let operand = if op.takes_immediate() {
            if args.is_empty() {
                0
            } else {
                fit(self.resolve(args)?, 24, self.line)?
            }
        } else {
            self.encode_registers(args)?
        };
        Ok(encode(op as u8, operand & OPERAND_MASK))
    }

    /// `rx, ry, imm`, each optional from the right.
    fn encode_registers(&self, args: &str) -> Result<u32, AssemblerError> {
        let parts: Vec<&str> = if args.is_empty() {
            Vec::new()
        } else {
            args.split(',').map(str::trim).collect()
        };
        if parts.len() > 3 {
            return Err(syntax(self.line, format!("expected at most 3 operands, got {}", parts.len())));
        }

        let reg = |i: usize| parts.get(i).map_or(Ok(None), |p| self.register(p));
        let rx = reg(0)?;
        let ry = reg(1)?;
        let imm = match parts.get(2) {
            Some(expr) => Some(fit(self.resolve(expr)?, 8, self.line)? as u8),
            None => None,
        };
        Ok(Operands { rx, ry, imm }.pack())
    }

    /// `rN` names register N; a literal `0` leaves the slot empty.
    fn register(&self, text: &str) -> Result<Option<u8>, AssemblerError> {
        if text == "0" {
            return Ok(None);
        }
        let invalid = || AssemblerError::InvalidRegister { line: self.line, register: text.to_string() };
        let digits = text.strip_prefix(|c| c == 'r' || c == 'R').ok_or_else(invalid)?;
        match digits.parse::<u8>() {
            Ok(n) if n < u8::MAX => Ok(Some(n)),
            _ => Err(invalid()),
        }
    }

    fn data_value(&self, expr: &str, size: usize) -> Result<u64, AssemblerError> {
        if expr.is_empty() {
            return Err(syntax(self.line, "missing data value"));
        }
        let value = self.resolve(expr)?;
        let bits = 8 * size as u32;
        // Negative values are stored two's complement.
        let min = if bits == 64 { i64::MIN } else { -(1i64 << (bits - 1)) };
        if value < min || (bits < 64 && value >= 1i64 << bits) {
            return Err(AssemblerError::TruncatedImmediate { line: self.line, value, bits });
        }
        Ok(value as u64)
    }

    fn resolve(&self, expr: &str) -> Result<i64, AssemblerError> {
        if expr == "." {
            return Ok(i64::from(self.pos));
        }
        if let Some(value) = parse_number(expr) {
            return Ok(value);
        }
        if is_identifier(expr) {
            return self
                .labels
                .get(expr)
                .map(|addr| i64::from(*addr))
                .ok_or_else(|| AssemblerError::UndefinedLabel { line: self.line, label: expr.to_string() });
        }
        Err(syntax(self.line, format!("invalid operand '{}'", expr)))
    }
}

/// Check that `value` fits an unsigned field of `bits` bits.
fn fit(value: i64, bits: u32, line: usize) -> Result<u32, AssemblerError> {
    if value < 0 || value >= 1i64 << bits {
        return Err(AssemblerError::TruncatedImmediate { line, value, bits });
    }
    Ok(value as u32)
}

fn parse_number(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Every quoted string in `args`, each followed by a NUL.
fn parse_text(args: &str, line: usize) -> Result<Vec<u8>, AssemblerError> {
    let mut bytes = Vec::new();
    let mut rest = args;
    while let Some(start) = rest.find('"') {
        let tail = &rest[start + 1..];
        let end = tail.find('"').ok_or_else(|| syntax(line, "unterminated string"))?;
        bytes.extend_from_slice(tail[..end].as_bytes());
        bytes.push(0);
        rest = &tail[end + 1..];
    }
    if bytes.is_empty() {
        return Err(syntax(line, "DT requires a quoted string"));
    }
    Ok(bytes)
}

/// Cut `line` at the first `#` outside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (idx, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn syntax(line: usize, message: impl Into<String>) -> AssemblerError {
    AssemblerError::SyntaxError { line, message: message.into() }
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("label defined twice on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("invalid register on line {line}: {register}")]
    InvalidRegister { line: usize, register: String },

    #[error("immediate truncated on line {line}: {value} does not fit in {bits} bits")]
    TruncatedImmediate { line: usize, value: i64, bits: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{solve_operand, Instruction};

    fn words(code: &[u8]) -> Vec<u32> {
        code.chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect()
    }

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            # Simple test program
            LOADi 100
            ADD r0, r0, 5
            MOV r1, r0, 8
            STOP
        "#;

        let program = assemble(source).unwrap();
        let code = words(&program.code);
        assert_eq!(code.len(), 4);
        assert_eq!(code[0], 0x0000_6403);
        assert_eq!(code[1], 0x0501_0110);
        assert_eq!(code[2], 0x0801_0223);
        assert_eq!(code[3], 0x0000_00FF);
        assert!(program.data.is_empty());
        assert_eq!(program.data_base, 16);
    }

    #[test]
    fn test_register_slots() {
        let program = assemble("MOV 0, r1, 3\nPUSH\nSWP r254, r3").unwrap();
        let code = words(&program.code);

        let ops = solve_operand(code[0] >> 8);
        assert_eq!((ops.rx, ops.ry, ops.imm), (None, Some(1), Some(3)));
        assert_eq!(code[1], Opcode::Push as u32);
        let ops = solve_operand(code[2] >> 8);
        assert_eq!((ops.rx, ops.ry), (Some(254), Some(3)));
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
        start:
            MOVi 1
            Bi end
            NOP
        end: STOP
        loop:
            Bi .
        "#;

        let program = assemble(source).unwrap();
        let code = words(&program.code);
        assert_eq!(program.labels["start"], 0);
        assert_eq!(program.labels["end"], 12);
        assert_eq!(code[1], encode(Opcode::Bi as u8, 12));
        assert_eq!(code[4], encode(Opcode::Bi as u8, 16));
    }

    #[test]
    fn test_assemble_data() {
        let source = r#"
        .code
            LOADi value
            STOP
        .data
        .base 0x100
        value: DD 42
        small: DB 0xFF
        neg:   DW -2
        msg:   DT "Hi"
        "#;

        let program = assemble(source).unwrap();
        assert_eq!(program.data_base, 0x100);
        assert_eq!(program.labels["value"], 0x100);
        assert_eq!(program.labels["msg"], 0x107);
        assert_eq!(
            program.data,
            vec![42, 0, 0, 0, 0xFF, 0xFE, 0xFF, b'H', b'i', 0]
        );
        assert_eq!(words(&program.code)[0], encode(Opcode::Load32i as u8, 0x100));
    }

    #[test]
    fn test_data_base_defaults_to_end_of_code() {
        let program = assemble("LOADi x\nSTOP\n.data\nx: DB 1").unwrap();
        assert_eq!(program.data_base, 8);
        assert_eq!(program.labels["x"], 8);
    }

    #[test]
    fn test_inline_data_in_code() {
        let program = assemble("DB 1\nDB 2\nDW 0x0403\nlabel: STOP").unwrap();
        assert_eq!(program.code[..4], [1, 2, 3, 4]);
        assert_eq!(program.labels["label"], 4);
    }

    #[test]
    fn test_truncated_immediate() {
        assert_eq!(
            assemble("ADD r0, r0, 256"),
            Err(AssemblerError::TruncatedImmediate { line: 1, value: 256, bits: 8 })
        );
        assert_eq!(
            assemble("\nMOVi 0x1000000"),
            Err(AssemblerError::TruncatedImmediate { line: 2, value: 0x100_0000, bits: 24 })
        );
        assert!(assemble("MOVi 0xFFFFFF").is_ok());
        assert!(matches!(
            assemble(".data\nDB 300"),
            Err(AssemblerError::TruncatedImmediate { line: 2, .. })
        ));
    }

    #[test]
    fn test_errors_report_lines() {
        assert_eq!(
            assemble("NOP\nFOO r1"),
            Err(AssemblerError::UnknownMnemonic { line: 2, mnemonic: "FOO".into() })
        );
        assert_eq!(
            assemble("Bi nowhere"),
            Err(AssemblerError::UndefinedLabel { line: 1, label: "nowhere".into() })
        );
        assert_eq!(
            assemble("MOV x1, r2"),
            Err(AssemblerError::InvalidRegister { line: 1, register: "x1".into() })
        );
        assert_eq!(
            assemble("MOV r255"),
            Err(AssemblerError::InvalidRegister { line: 1, register: "r255".into() })
        );
        assert_eq!(
            assemble("a: NOP\na: NOP"),
            Err(AssemblerError::DuplicateLabel { line: 2, label: "a".into() })
        );
        assert!(matches!(assemble(".data\nNOP"), Err(AssemblerError::SyntaxError { line: 2, .. })));
        assert!(matches!(assemble("DT \"open"), Err(AssemblerError::SyntaxError { .. })));
    }

    #[test]
    fn test_aliases_and_case() {
        let program = assemble("loadi 4\nstore r1\nStop").unwrap();
        let code = words(&program.code);
        assert_eq!(Instruction::from_word(code[0]).op(), Some(Opcode::Load32i));
        assert_eq!(Instruction::from_word(code[1]).op(), Some(Opcode::Store32));
        assert_eq!(Instruction::from_word(code[2]).op(), Some(Opcode::Stop));
    }

    #[test]
    fn test_colon_inside_string() {
        let program = assemble(".data\nDT \"a:b\"").unwrap();
        assert_eq!(program.data, b"a:b\0".to_vec());
    }

    #[test]
    fn test_hash_inside_string() {
        let program = assemble(".data\nmsg: DT \"a#b\" # trailing comment").unwrap();
        assert_eq!(program.data, b"a#b\0".to_vec());
        assert_eq!(strip_comment("MOVi 1 # \"x\""), "MOVi 1 ");
    }

    #[test]
    fn test_program_into_image() {
        let program = assemble("STOP\n.data\nDB 7").unwrap();
        let image = Image::from(program);
        assert_eq!(image.code, vec![0xFF, 0, 0, 0]);
        assert_eq!(image.data, vec![7]);
        assert_eq!(image.data_base, 4);
    }
}
