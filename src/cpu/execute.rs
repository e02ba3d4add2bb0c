//! CPU execution engine for the RISC1.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//! Every memory access, instruction fetches included, goes through the MMU.

use crate::cpu::alu::{self, AluError};
use crate::cpu::decode::{Instruction, Opcode, Operands, WORD_SIZE};
use crate::cpu::intvec::{InterruptLine, InterruptVector, DEFAULT_SLOTS};
use crate::cpu::memory::{AddressSpace, Memory, MemoryError};
use crate::cpu::mmu::Mmu;
use crate::cpu::registers::{Registers, ACC, REG_RA, REG_SP};
use crate::cpu::stack::{Stack, StackError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed STOP).
    Halted,
    /// CPU stopped on an error.
    Error,
}

/// An instruction handler. Receives the fetched instruction; PC has already
/// been advanced past it.
type Handler = fn(&mut Cpu, Instruction) -> Result<(), CpuError>;

type AluOp = fn(&[u32]) -> Result<u32, AluError>;
type BitOp = fn(u32, u32) -> u32;

/// The RISC1 CPU.
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Memory, behind the MMU.
    pub mmu: Mmu,
    /// Interrupt handler table and pending queue.
    pub intvec: InterruptVector,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    stack_base: u32,
    stack_size: Option<u32>,
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU over `mem` with the default interrupt slot count.
    pub fn new(mem: AddressSpace) -> Self {
        Self::with_slots(mem, DEFAULT_SLOTS)
    }

    pub fn with_slots(mem: AddressSpace, interrupt_slots: usize) -> Self {
        Self {
            regs: Registers::new(),
            mmu: Mmu::new(mem),
            intvec: InterruptVector::new(interrupt_slots),
            state: CpuState::Running,
            cycles: 0,
            stack_base: 0,
            stack_size: None,
            last_instr: None,
        }
    }

    /// Point SP at `base` and bound stack operations through SP to `size` bytes.
    pub fn set_stack(&mut self, base: u32, size: Option<u32>) {
        self.stack_base = base;
        self.stack_size = size;
        self.regs.set(REG_SP, base);
        log::debug!("stack at {:#x}, bound {:?}", base, size);
    }

    /// Copy raw bytes into physical memory at `pos`.
    pub fn load_program(&mut self, pos: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.mmu.memory_mut().load(pos, bytes)
    }

    /// Physical memory.
    pub fn memory(&self) -> &AddressSpace {
        self.mmu.memory()
    }

    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        self.mmu.memory_mut()
    }

    /// Handle for raising interrupts from other threads.
    pub fn interrupt_line(&self) -> Arc<InterruptLine> {
        self.intvec.line()
    }

    /// Request interrupt `number`. Returns whether it was accepted.
    pub fn raise_interrupt(&self, number: u32) -> bool {
        self.intvec.raise(number)
    }

    /// Execute a single instruction.
    ///
    /// A pending interrupt is serviced first, so the instruction executed may
    /// be the first one of its handler. Any error leaves the CPU in
    /// [`CpuState::Error`].
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        let result = self.cycle();
        if let Err(e) = &result {
            log::debug!("CPU error at cycle {}: {}", self.cycles, e);
            self.state = CpuState::Error;
        }
        result
    }

    fn cycle(&mut self) -> Result<Instruction, CpuError> {
        self.service_interrupt()?;

        // Fetch
        let pc = self.regs.pc();
        let word = self.mmu.get_data(pc, WORD_SIZE as usize)? as u32;
        self.regs.advance_pc(WORD_SIZE);

        // Decode
        let instr = Instruction::from_word(word);
        log::trace!("[PC {:#010x}] {}", pc, instr);

        // Execute
        self.execute(instr, pc)?;

        self.cycles += 1;
        self.last_instr = Some(instr);
        Ok(instr)
    }

    /// Dispatch at most one pending interrupt.
    fn service_interrupt(&mut self) -> Result<(), CpuError> {
        let Some(number) = self.intvec.take_pending() else {
            return Ok(());
        };
        let handler = self.intvec.handler(number).ok_or(CpuError::NoHandler(number))?;
        log::debug!("interrupt {} -> {:#x}", number, handler);
        self.regs.set(REG_RA, self.regs.pc());
        self.regs.jump(handler);
        Ok(())
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction fetched from `pc`.
    fn execute(&mut self, instr: Instruction, pc: u32) -> Result<(), CpuError> {
        match instr.op() {
            Some(Opcode::Stop) => {
                self.state = CpuState::Halted;
                log::info!("halted at {:#x}, registers: {:?}", pc, self.regs);
            }
            Some(Opcode::Iret) => {
                self.regs.jump(self.regs.get(REG_RA));
                self.intvec.enable();
            }
            op => {
                let handler = op
                    .and_then(handler_for)
                    .ok_or(CpuError::IllegalInstruction { opcode: instr.opcode, pc })?;
                handler(self, instr)?;
            }
        }
        Ok(())
    }

    // ==================== Load / Store ====================

    fn load_absolute(&mut self, instr: Instruction, size: usize) -> Result<(), CpuError> {
        let value = self.mmu.get_data(instr.operand, size)?;
        self.regs.set(ACC, value as u32);
        Ok(())
    }

    fn store_absolute(&mut self, instr: Instruction, size: usize) -> Result<(), CpuError> {
        self.mmu.set_data(instr.operand, u64::from(self.regs.acc()), size)?;
        Ok(())
    }

    /// Effective address of an indexed access: `rx + imm`.
    fn indexed(&self, ops: Operands) -> u32 {
        self.regs
            .value_or(ops.rx, 0)
            .wrapping_add(u32::from(ops.imm.unwrap_or(0)))
    }

    fn load_indexed(&mut self, instr: Instruction, size: usize) -> Result<(), CpuError> {
        let ops = instr.operands();
        let addr = self.indexed(ops);
        let value = self.mmu.get_data(addr, size)?;
        self.regs.set(ops.ry.unwrap_or(ACC), value as u32);
        Ok(())
    }

    fn store_indexed(&mut self, instr: Instruction, size: usize) -> Result<(), CpuError> {
        let ops = instr.operands();
        let addr = self.indexed(ops);
        let value = self.regs.value_or(ops.ry, self.regs.acc());
        self.mmu.set_data(addr, u64::from(value), size)?;
        Ok(())
    }

    // ==================== Move ====================

    fn mov(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        if let Some(rx) = ops.rx {
            let value = self.regs.value_or(ops.ry, 0).wrapping_add(imm_or_zero(ops));
            self.regs.set(rx, value);
        }
        Ok(())
    }

    fn swap(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        if let (Some(rx), Some(ry)) = (ops.rx, ops.ry) {
            let (x, y) = (self.regs.get(rx), self.regs.get(ry));
            self.regs.set(rx, y.wrapping_add(imm_or_zero(ops)));
            self.regs.set(ry, x.wrapping_add(imm_or_zero(ops)));
        }
        Ok(())
    }

    // ==================== ALU ====================

    /// `rx = ry OP imm`, or `rx = rx OP src` when only one source is given.
    fn arith(&mut self, instr: Instruction, op: AluOp) -> Result<(), CpuError> {
        let ops = instr.operands();
        let dst = ops.rx.unwrap_or(ACC);
        let args = match (ops.ry, ops.imm) {
            (Some(ry), Some(imm)) => [self.regs.get(ry), u32::from(imm)],
            (Some(ry), None) => [self.regs.get(dst), self.regs.get(ry)],
            (None, Some(imm)) => [self.regs.get(dst), u32::from(imm)],
            (None, None) => [self.regs.get(dst), 0],
        };
        let result = op(&args)?;
        self.regs.set(dst, result);
        Ok(())
    }

    /// `a = rx`, `b = imm` or `ry`; the result lands in `ry` if given, else `rx`.
    fn bitwise(&mut self, instr: Instruction, op: BitOp) -> Result<(), CpuError> {
        let ops = instr.operands();
        let a = self.regs.value_or(ops.rx, self.regs.acc());
        let b = match ops.imm {
            Some(imm) => u32::from(imm),
            None => self.regs.value_or(ops.ry, 0),
        };
        let dst = ops.ry.or(ops.rx).unwrap_or(ACC);
        self.regs.set(dst, op(a, b));
        Ok(())
    }

    fn not(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let dst = instr.operands().rx.unwrap_or(ACC);
        self.regs.set(dst, alu::not(self.regs.get(dst)));
        Ok(())
    }

    // ==================== Branch ====================

    fn branch_if(&mut self, cond: bool, target: u32) -> Result<(), CpuError> {
        if cond {
            self.regs.jump(target);
        }
        Ok(())
    }

    /// `rx + imm`, with the accumulator standing in for a missing `rx`.
    fn register_target(&self, ops: Operands) -> u32 {
        self.regs
            .value_or(ops.rx, self.regs.acc())
            .wrapping_add(imm_or_zero(ops))
    }

    /// BZ/BNZ: test `ry` (default ACC), jump to `rx` if given, else to `imm`.
    fn branch_zero(&mut self, instr: Instruction, on_zero: bool) -> Result<(), CpuError> {
        let ops = instr.operands();
        let test = self.regs.value_or(ops.ry, self.regs.acc());
        let target = self.regs.value_or(ops.rx, imm_or_zero(ops));
        self.branch_if((test == 0) == on_zero, target)
    }

    /// BE/BNE: skip forward by `imm` bytes when `rx` and `ry` compare as asked.
    fn branch_relative(&mut self, instr: Instruction, on_equal: bool) -> Result<(), CpuError> {
        let ops = instr.operands();
        let x = self.regs.value_or(ops.rx, self.regs.acc());
        let y = self.regs.value_or(ops.ry, 0);
        let target = self.regs.pc().wrapping_add(imm_or_zero(ops));
        self.branch_if((x == y) == on_equal, target)
    }

    fn branch_long(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        let test = self.regs.value_or(ops.ry, self.regs.acc());
        let target = self.regs.value_or(ops.rx, 0).wrapping_add(imm_or_zero(ops));
        self.branch_if(test == 0, target)
    }

    fn call(&mut self, target: u32) -> Result<(), CpuError> {
        self.regs.set(REG_RA, self.regs.pc());
        self.regs.jump(target);
        Ok(())
    }

    // ==================== System ====================

    /// INTVEC: base from `rx`, slot count from `imm`, flags from `ry`.
    fn configure_intvec(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        let base = self.regs.value_or(ops.rx, 0);
        let slots = ops.imm.map_or(self.intvec.count(), usize::from);
        self.intvec.install(base, WORD_SIZE, slots);
        if let Some(ry) = ops.ry {
            self.intvec.set_flags(self.regs.get(ry));
        }
        Ok(())
    }

    /// MAP: reload the page table from `rx`/`ry`, then apply the `imm` switches.
    fn configure_mmu(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        if let Some(rx) = ops.rx {
            let count = self.regs.value_or(ops.ry, 0);
            self.mmu.initialize(self.regs.get(rx), count)?;
        }
        let switches = ops.imm.unwrap_or(0);
        if switches & 0x2 != 0 {
            self.mmu.disable();
        } else if switches & 0x1 != 0 {
            self.mmu.enable();
        }
        Ok(())
    }

    /// Stack bounds for a stack whose pointer lives in `reg`.
    fn stack_bounds(&self, reg: u8) -> (u32, Option<u32>) {
        if reg == REG_SP {
            (self.stack_base, self.stack_size)
        } else {
            (self.regs.get(reg), None)
        }
    }

    fn push(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        let reg = ops.rx.unwrap_or(REG_SP);
        let value = self.regs.value_or(ops.ry, self.regs.acc());
        let (base, size) = self.stack_bounds(reg);

        let mut stack = Stack::with_pointer(&mut self.mmu, base, self.regs.get(reg), WORD_SIZE);
        stack.set_size(size);
        stack.push(value)?;
        let pointer = stack.pointer();
        self.regs.set(reg, pointer);
        Ok(())
    }

    fn pop(&mut self, instr: Instruction) -> Result<(), CpuError> {
        let ops = instr.operands();
        let reg = ops.rx.unwrap_or(REG_SP);
        let (base, size) = self.stack_bounds(reg);

        let mut stack = Stack::with_pointer(&mut self.mmu, base, self.regs.get(reg), WORD_SIZE);
        stack.set_size(size);
        let value = stack.pop()?;
        let pointer = stack.pointer();
        self.regs.set(reg, pointer);
        self.regs.set(ops.ry.unwrap_or(ACC), value);
        Ok(())
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Serializable view of the architectural state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            cycles: self.cycles,
            pc: self.regs.pc(),
            registers: self.regs.clone(),
            interrupts_enabled: self.intvec.is_enabled(),
            paging_enabled: self.mmu.is_enabled(),
        }
    }
}

fn imm_or_zero(ops: Operands) -> u32 {
    u32::from(ops.imm.unwrap_or(0))
}

/// The dispatch table. Opcodes without an entry are illegal.
fn handler_for(op: Opcode) -> Option<Handler> {
    use Opcode::*;

    let handler: Handler = match op {
        Load8i => |cpu, i| cpu.load_absolute(i, 1),
        Load16i => |cpu, i| cpu.load_absolute(i, 2),
        Load32i => |cpu, i| cpu.load_absolute(i, 4),
        Store8i => |cpu, i| cpu.store_absolute(i, 1),
        Store16i => |cpu, i| cpu.store_absolute(i, 2),
        Store32i => |cpu, i| cpu.store_absolute(i, 4),
        Load8 => |cpu, i| cpu.load_indexed(i, 1),
        Load16 => |cpu, i| cpu.load_indexed(i, 2),
        Load32 => |cpu, i| cpu.load_indexed(i, 4),
        Store8 => |cpu, i| cpu.store_indexed(i, 1),
        Store16 => |cpu, i| cpu.store_indexed(i, 2),
        Store32 => |cpu, i| cpu.store_indexed(i, 4),
        LoadAddri => |cpu, i| {
            cpu.regs.set(ACC, i.operand);
            Ok(())
        },

        Nop => |_, _| Ok(()),
        Mov => Cpu::mov,
        Movi => |cpu, i| {
            cpu.regs.set(ACC, i.operand);
            Ok(())
        },
        Swp => Cpu::swap,

        Add => |cpu, i| cpu.arith(i, |a| Ok(alu::add(a))),
        Sub => |cpu, i| cpu.arith(i, |a| Ok(alu::sub(a))),
        Mul => |cpu, i| cpu.arith(i, |a| Ok(alu::mul(a))),
        Div => |cpu, i| cpu.arith(i, alu::div),
        Mod => |cpu, i| cpu.arith(i, alu::modulo),

        Shl => |cpu, i| cpu.bitwise(i, alu::shl),
        Shr => |cpu, i| cpu.bitwise(i, alu::shr),
        And => |cpu, i| cpu.bitwise(i, alu::and),
        Or => |cpu, i| cpu.bitwise(i, alu::or),
        Xor => |cpu, i| cpu.bitwise(i, alu::xor),
        Not => Cpu::not,

        Bi => |cpu, i| cpu.branch_if(true, i.operand),
        B => |cpu, i| {
            let target = cpu.register_target(i.operands());
            cpu.branch_if(true, target)
        },
        Bzi => |cpu, i| cpu.branch_if(cpu.regs.acc() == 0, i.operand),
        Bz => |cpu, i| cpu.branch_zero(i, true),
        Bnzi => |cpu, i| cpu.branch_if(cpu.regs.acc() != 0, i.operand),
        Bnz => |cpu, i| cpu.branch_zero(i, false),
        Be => |cpu, i| cpu.branch_relative(i, true),
        Bne => |cpu, i| cpu.branch_relative(i, false),
        Ble => Cpu::branch_long,
        Bsubi => |cpu, i| cpu.call(i.operand),
        Bsub => |cpu, i| {
            let target = cpu.register_target(i.operands());
            cpu.call(target)
        },
        Bret => |cpu, _| {
            let ra = cpu.regs.get(REG_RA);
            cpu.branch_if(true, ra)
        },

        Intvec => Cpu::configure_intvec,
        Seti => |cpu, _| {
            cpu.intvec.enable();
            Ok(())
        },
        Clri => |cpu, _| {
            cpu.intvec.disable();
            Ok(())
        },
        Map => Cpu::configure_mmu,

        Push => Cpu::push,
        Pop => Cpu::pop,

        Start | Co | Cos | Coq | Coh | Iret | Stop => return None,
    };
    Some(handler)
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("mmu", &self.mmu.is_enabled())
            .finish()
    }
}

/// Architectural state at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: CpuState,
    pub cycles: u64,
    pub pc: u32,
    pub registers: Registers,
    pub interrupts_enabled: bool,
    pub paging_enabled: bool,
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("stack error: {0}")]
    Stack(#[from] StackError),

    #[error("ALU error: {0}")]
    Alu(#[from] AluError),

    #[error("illegal instruction {opcode:#04x} at {pc:#x}")]
    IllegalInstruction { opcode: u8, pc: u32 },

    #[error("no handler installed for interrupt {0}")]
    NoHandler(u32),
}
