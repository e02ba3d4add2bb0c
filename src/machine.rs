//! A complete RISC1 machine: CPU, memory, terminal and clock built from a
//! [`MachineConfig`].

use crate::asm::assembler::{assemble, AssemblerError};
use crate::asm::image::{load_image, Image, ImageError};
use crate::config::{ConfigError, MachineConfig};
use crate::cpu::execute::{Cpu, CpuError, Snapshot};
use crate::cpu::memory::{AddressSpace, MemoryError};
use crate::sysio::clock::Clock;
use crate::sysio::terminal::{Sink, Terminal};
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub struct Machine {
    pub cpu: Cpu,
    terminal: Option<Arc<Terminal>>,
    config: MachineConfig,
}

impl Machine {
    /// Build a machine whose terminal prints to stdout.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        Self::with_output(config, Box::new(io::stdout()))
    }

    /// Build a machine whose terminal prints to `output`.
    pub fn with_output(config: MachineConfig, output: Sink) -> Result<Self, MachineError> {
        let mut mem = match config.memory_size {
            Some(size) => AddressSpace::new(size),
            None => AddressSpace::auto_sized(),
        };

        let terminal = match &config.terminal {
            Some(term) => {
                let terminal = Arc::new(Terminal::with_output(term, output));
                terminal.attach(&mut mem)?;
                Some(terminal)
            }
            None => None,
        };

        let mut cpu = Cpu::with_slots(mem, config.interrupt_slots);
        cpu.set_stack(config.stack.base, config.stack.size);

        Ok(Self { cpu, terminal, config })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn terminal(&self) -> Option<&Arc<Terminal>> {
        self.terminal.as_ref()
    }

    pub fn load_image(&mut self, image: &Image) -> Result<(), MachineError> {
        image.load_into(self.cpu.memory_mut())?;
        Ok(())
    }

    /// Run until the CPU halts, fails, or hits `max_cycles`.
    ///
    /// The configured clock runs only while this call is active.
    pub fn run(&mut self) -> Result<u64, MachineError> {
        let _clock = match self.config.timer {
            Some(timer) => Some(
                Clock::start(timer.hz, timer.interrupt, self.cpu.interrupt_line())
                    .map_err(MachineError::Clock)?,
            ),
            None => None,
        };

        log::info!("machine started");
        let executed = match self.config.max_cycles {
            Some(limit) => {
                let executed = self.cpu.run_limited(limit)?;
                if self.cpu.is_running() {
                    log::warn!("cycle limit of {} reached, stopping", limit);
                }
                executed
            }
            None => self.cpu.run()?,
        };
        log::info!("machine stopped after {} cycles", executed);

        Ok(executed)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.cpu.snapshot()
    }
}

/// Read a program: `.asm` files are assembled, anything else is an RE01 image.
pub fn load_program<P: AsRef<Path>>(path: P) -> Result<Image, MachineError> {
    let path = path.as_ref();
    if path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("asm")) {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ImageError::IoError(format!("{}: {}", path.display(), e)))?;
        Ok(assemble(&source)?.into())
    } else {
        Ok(load_image(path)?)
    }
}

#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Cpu(#[from] CpuError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Assembler(#[from] AssemblerError),

    #[error("failed to start clock: {0}")]
    Clock(#[source] io::Error),
}
