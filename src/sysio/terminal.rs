//! Memory-mapped character terminal.
//!
//! The screen is `width × height` bytes mapped at the screen base. Four
//! control bytes at the control base accept commands:
//! - `0xAA`: start a width update
//! - `0xBB`: start a height update
//! - `0x01`: print the screen to the output sink
//!
//! Any other byte written after `0xAA`/`0xBB` is shifted into that dimension
//! (`dim = dim << 8 | byte`) and the screen is resized.

use crate::config::TerminalConfig;
use crate::cpu::memory::{AddressSpace, Device, MemoryError};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of control addresses.
pub const CONTROL_PORTS: u32 = 4;

/// Upper bound on screen cells, whatever the programmed dimensions.
const MAX_CELLS: usize = 1 << 20;

const CMD_WIDTH: u8 = 0xAA;
const CMD_HEIGHT: u8 = 0xBB;
const CMD_PRINT: u8 = 0x01;

/// Where printed screens go.
pub type Sink = Box<dyn Write + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Update {
    Idle,
    Width,
    Height,
}

struct Screen {
    width: u32,
    height: u32,
    cells: Vec<u8>,
    update: Update,
}

impl Screen {
    fn resize(&mut self) {
        let cells = (self.width as usize)
            .saturating_mul(self.height as usize)
            .min(MAX_CELLS);
        self.cells.resize(cells, 0);
    }

    fn render(&self) -> String {
        let width = self.width.max(1) as usize;
        self.cells
            .chunks(width)
            .map(|row| {
                let line: String = row
                    .iter()
                    .map(|&b| if b == 0 { ' ' } else { char::from(b) })
                    .collect();
                line + "\n"
            })
            .collect()
    }
}

pub struct Terminal {
    control_base: u32,
    screen_base: u32,
    screen: Mutex<Screen>,
    output: Mutex<Sink>,
}

impl Terminal {
    /// Terminal printing to stdout.
    pub fn new(config: &TerminalConfig) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: &TerminalConfig, output: Sink) -> Self {
        let mut screen = Screen {
            width: config.width,
            height: config.height,
            cells: Vec::new(),
            update: Update::Idle,
        };
        screen.resize();
        Self {
            control_base: config.control_base,
            screen_base: config.screen_base,
            screen: Mutex::new(screen),
            output: Mutex::new(output),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Screen> {
        self.screen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the control ports and the current screen area in `mem`.
    pub fn attach(self: &Arc<Self>, mem: &mut AddressSpace) -> Result<(), MemoryError> {
        let cells = self.lock().cells.len() as u32;
        let device: Arc<dyn Device> = self.clone();
        for addr in (0..CONTROL_PORTS).map(|i| self.control_base.wrapping_add(i)) {
            mem.add_special(addr, Arc::clone(&device))?;
        }
        for addr in (0..cells).map(|i| self.screen_base.wrapping_add(i)) {
            mem.add_special(addr, Arc::clone(&device))?;
        }
        log::debug!(
            "terminal attached: control {:#x}, screen {:#x} ({} cells)",
            self.control_base,
            self.screen_base,
            cells
        );
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.lock().width
    }

    pub fn height(&self) -> u32 {
        self.lock().height
    }

    /// Copy of the screen buffer.
    pub fn screen(&self) -> Vec<u8> {
        self.lock().cells.clone()
    }

    /// Screen as text, one line per row, NUL shown as a space.
    pub fn render(&self) -> String {
        self.lock().render()
    }

    fn is_control(&self, addr: u32) -> bool {
        addr.wrapping_sub(self.control_base) < CONTROL_PORTS
    }

    fn control(&self, value: u8) {
        let mut screen = self.lock();
        match value {
            CMD_WIDTH => {
                screen.update = Update::Width;
                screen.width = 0;
            }
            CMD_HEIGHT => {
                screen.update = Update::Height;
                screen.height = 0;
            }
            CMD_PRINT => {
                screen.update = Update::Idle;
                let text = screen.render();
                drop(screen);
                self.print(&text);
            }
            byte => {
                match screen.update {
                    Update::Width => screen.width = screen.width << 8 | u32::from(byte),
                    Update::Height => screen.height = screen.height << 8 | u32::from(byte),
                    Update::Idle => return,
                }
                screen.resize();
            }
        }
    }

    fn print(&self, text: &str) {
        log::info!("terminal print ({} bytes)", text.len());
        let mut out = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writeln!(out, "==== Terminal ====")
            .and_then(|_| out.write_all(text.as_bytes()))
            .and_then(|_| writeln!(out, "=================="))
            .and_then(|_| out.flush());
        if let Err(e) = result {
            log::warn!("terminal output failed: {}", e);
        }
    }
}

impl Device for Terminal {
    fn get(&self, addr: u32) -> u8 {
        if self.is_control(addr) {
            return 0;
        }
        let offset = addr.wrapping_sub(self.screen_base) as usize;
        self.lock().cells.get(offset).copied().unwrap_or(0)
    }

    fn set(&self, addr: u32, value: u8) {
        if self.is_control(addr) {
            self.control(value);
            return;
        }
        let offset = addr.wrapping_sub(self.screen_base) as usize;
        if let Some(cell) = self.lock().cells.get_mut(offset) {
            *cell = value;
        }
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let screen = self.lock();
        f.debug_struct("Terminal")
            .field("control_base", &self.control_base)
            .field("screen_base", &self.screen_base)
            .field("width", &screen.width)
            .field("height", &screen.height)
            .finish()
    }
}
