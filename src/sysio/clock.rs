//! Periodic interrupt source.
//!
//! The clock runs on its own thread and raises a fixed interrupt number on
//! the CPU's [`InterruptLine`] every period. Dropping the clock stops and
//! joins the thread.

use crate::cpu::intvec::InterruptLine;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Frequency used when 0 Hz is requested.
pub const DEFAULT_HZ: u32 = 100;

enum Command {
    Pause,
    Resume,
    Stop,
}

pub struct Clock {
    control: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Clock {
    /// Start raising `interrupt` on `line` at `hz` ticks per second.
    pub fn start(hz: u32, interrupt: u32, line: Arc<InterruptLine>) -> io::Result<Self> {
        let hz = if hz == 0 { DEFAULT_HZ } else { hz };
        let period = Duration::from_secs(1) / hz;
        let (control, commands) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("risc1-clock".into())
            .spawn(move || {
                let mut paused = false;
                loop {
                    match commands.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) if !paused => {
                            line.raise(interrupt);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(Command::Pause) => paused = true,
                        Ok(Command::Resume) => paused = false,
                        Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        log::debug!("clock started: interrupt {} at {} Hz", interrupt, hz);
        Ok(Self { control, handle: Some(handle) })
    }

    /// Stop raising interrupts until [`Clock::resume`].
    pub fn pause(&self) {
        let _ = self.control.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(Command::Resume);
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A send error means the thread is already gone.
        let _ = self.control.send(Command::Stop);
        if handle.join().is_err() {
            log::warn!("clock thread panicked");
        }
        log::debug!("clock stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}
