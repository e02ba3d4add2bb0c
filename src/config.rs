//! Machine configuration, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration:
//!
//! ```json
//! {
//!   "memory_size": 65536,
//!   "interrupt_slots": 4,
//!   "stack": { "base": 65536, "size": null },
//!   "timer": { "hz": 100, "interrupt": 0 },
//!   "terminal": { "control_base": 32768, "screen_base": 32784, "width": 80, "height": 24 },
//!   "max_cycles": null
//! }
//! ```

use crate::cpu::intvec::DEFAULT_SLOTS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MEMORY_SIZE: u32 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Fixed memory size in bytes; `None` grows memory on demand.
    pub memory_size: Option<u32>,
    pub interrupt_slots: usize,
    pub stack: StackConfig,
    pub timer: Option<TimerConfig>,
    pub terminal: Option<TerminalConfig>,
    pub max_cycles: Option<u64>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: Some(DEFAULT_MEMORY_SIZE),
            interrupt_slots: DEFAULT_SLOTS,
            stack: StackConfig::default(),
            timer: None,
            terminal: Some(TerminalConfig::default()),
            max_cycles: None,
        }
    }
}

impl MachineConfig {
    /// Read a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interrupt_slots == 0 {
            return Err(ConfigError::Invalid("interrupt_slots must be at least 1".into()));
        }
        if let Some(size) = self.memory_size {
            if size == 0 {
                return Err(ConfigError::Invalid("memory_size must be non-zero".into()));
            }
        }
        Ok(())
    }
}

/// Initial SP and its optional bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub base: u32,
    pub size: Option<u32>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self { base: DEFAULT_MEMORY_SIZE, size: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub hz: u32,
    pub interrupt: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { hz: crate::sysio::clock::DEFAULT_HZ, interrupt: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub control_base: u32,
    pub screen_base: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { control_base: 0x8000, screen_base: 0x8010, width: 80, height: 24 }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {0}")]
    Io(String),

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
