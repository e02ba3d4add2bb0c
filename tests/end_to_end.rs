//! Assembler → image → machine, driven through the public API.

use risc1::cpu::registers::{ACC, REG_RA};
use risc1::{assemble, CpuState, Image, Machine, MachineConfig, Memory};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn machine_with(config: MachineConfig, source: &str) -> (Machine, Capture) {
    let capture = Capture::default();
    let mut machine = Machine::with_output(config, Box::new(capture.clone())).unwrap();
    let image: Image = assemble(source).unwrap().into();
    machine.load_image(&image).unwrap();
    (machine, capture)
}

#[test]
fn test_arithmetic_program() {
    let source = "\
        LOADi 100\n\
        ADD r0, r0, 5\n\
        MOV r1, r0, 8\n\
        STOP\n\
        .data\n\
        .base 100\n\
        DD 10\n";
    let (mut machine, _) = machine_with(MachineConfig::default(), source);
    assert_eq!(machine.run().unwrap(), 4);
    assert_eq!(machine.cpu.state, CpuState::Halted);
    assert_eq!(machine.cpu.regs.get(ACC), 15);
    assert_eq!(machine.cpu.regs.get(1), 23);
}

#[test]
fn test_image_bytes_run_the_same() {
    let source = "MOVi 0x2A\nMOV r7, r0, 1\nSTOP";
    let bytes = Image::from(assemble(source).unwrap()).to_bytes();
    assert_eq!(&bytes[..4], b"RE01");

    let mut machine = Machine::with_output(MachineConfig::default(), Box::new(io::sink())).unwrap();
    machine.load_image(&Image::parse(&bytes).unwrap()).unwrap();
    machine.run().unwrap();
    assert_eq!(machine.cpu.regs.get(7), 0x2B);
}

#[test]
fn test_hello_on_terminal() {
    let source = "\
        MOVi 0x48\nSTORE8i 0x8010\n\
        MOVi 0x65\nSTORE8i 0x8011\n\
        MOVi 0x6C\nSTORE8i 0x8012\n\
        STORE8i 0x8013\n\
        MOVi 0x6F\nSTORE8i 0x8014\n\
        MOVi 1\nSTORE8i 0x8000\n\
        STOP";
    let (mut machine, capture) = machine_with(MachineConfig::default(), source);
    machine.run().unwrap();

    let terminal = machine.terminal().unwrap();
    assert_eq!(&terminal.screen()[..5], b"Hello");
    assert!(terminal.screen()[5..].iter().all(|&b| b == 0));
    assert!(capture.text().contains("Hello"));
    // The screen lives in the device, not in RAM underneath.
    assert_eq!(machine.cpu.memory().get_raw(0x8010).unwrap(), b'H');
}

#[test]
fn test_interrupt_round_trip() {
    let source = "\
        INTVEC r1, 0, 4\n\
        SETI\n\
        ADD r2, 0, 1\n\
        ADD r2, 0, 1\n\
        STOP";
    let (mut machine, _) = machine_with(MachineConfig::default(), source);
    // Slot 1 of a vector at 0x100 is 0x104.
    let handler: Image = assemble("MOVi 9\nIRET").unwrap().into();
    machine.cpu.memory_mut().load(0x104, &handler.code).unwrap();
    machine.cpu.regs.set(1, 0x100);

    machine.cpu.step().unwrap();
    machine.cpu.step().unwrap();
    assert!(machine.cpu.raise_interrupt(1));
    assert!(!machine.cpu.raise_interrupt(2));

    machine.cpu.step().unwrap();
    assert_eq!(machine.cpu.regs.get(REG_RA), 8);
    assert_eq!(machine.cpu.regs.get(ACC), 9);
    assert!(!machine.cpu.intvec.is_enabled());

    machine.run().unwrap();
    assert!(machine.cpu.intvec.is_enabled());
    assert_eq!(machine.cpu.regs.get(2), 2);
    assert_eq!(machine.snapshot().cycles, 7);
}

#[test]
fn test_stack_bound_from_config() {
    let mut config = MachineConfig::default();
    config.stack.base = 0x4000;
    config.stack.size = Some(8);
    let (mut machine, _) = machine_with(config, "MOVi 1\nPUSH\nPUSH\nPUSH\nSTOP");
    let err = machine.run().unwrap_err();
    assert!(err.to_string().contains("overflow"), "{}", err);
    assert_eq!(machine.cpu.state, CpuState::Error);
}

#[test]
fn test_snapshot_json() {
    let (mut machine, _) = machine_with(MachineConfig::default(), "MOVi 15\nSTOP");
    machine.run().unwrap();
    let json = serde_json::to_value(machine.snapshot()).unwrap();
    assert_eq!(json["state"], "Halted");
    assert_eq!(json["registers"]["r0"], 15);
    assert_eq!(json["cycles"], 2);
}
