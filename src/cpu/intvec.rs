//! Interrupt vector.
//!
//! The vector holds one handler address per slot, a global enable flag and a
//! FIFO of pending interrupt numbers. The flag and the FIFO live in an
//! [`InterruptLine`] that is shared with interrupt sources running on other
//! threads; the slot table is owned by the CPU.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Slot count used when none is configured.
pub const DEFAULT_SLOTS: usize = 4;

#[derive(Debug, Default)]
struct LineState {
    enabled: bool,
    pending: VecDeque<u32>,
}

/// Enable flag plus pending queue, safe to share across threads.
#[derive(Debug, Default)]
pub struct InterruptLine {
    state: Mutex<LineState>,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LineState> {
        // The state is two plain fields; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request interrupt `number`.
    ///
    /// Ignored while interrupts are disabled. An accepted raise masks further
    /// raises until the line is re-enabled. Returns whether it was accepted.
    pub fn raise(&self, number: u32) -> bool {
        let mut state = self.lock();
        if !state.enabled {
            log::trace!("interrupt {} dropped: masked", number);
            return false;
        }
        state.enabled = false;
        state.pending.push_back(number);
        true
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Dequeue the oldest pending interrupt.
    pub fn take_pending(&self) -> Option<u32> {
        self.lock().pending.pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

/// Handler table plus its shared line.
#[derive(Debug)]
pub struct InterruptVector {
    slots: Vec<u32>,
    slot_count: usize,
    line: Arc<InterruptLine>,
}

impl InterruptVector {
    /// Create a vector with `slot_count` slots and nothing installed.
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: Vec::new(),
            slot_count,
            line: Arc::new(InterruptLine::new()),
        }
    }

    /// Install handlers for `slot_count` slots starting at `base`.
    ///
    /// Slot `i` handles at `base + i * word_size`; the addresses are computed,
    /// nothing is read from memory.
    pub fn install(&mut self, base: u32, word_size: u32, slot_count: usize) {
        self.slot_count = slot_count;
        self.slots = (0..slot_count as u32)
            .map(|i| base.wrapping_add(i.wrapping_mul(word_size)))
            .collect();
        log::debug!("interrupt vector installed at {:#x} ({} slots)", base, slot_count);
    }

    /// Bit 0 enables interrupts, everything else is ignored.
    pub fn set_flags(&self, flags: u32) {
        self.line.set_enabled(flags & 0x1 == 0x1);
    }

    pub fn enable(&self) {
        self.line.set_enabled(true);
    }

    pub fn disable(&self) {
        self.line.set_enabled(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.line.is_enabled()
    }

    pub fn raise(&self, number: u32) -> bool {
        self.line.raise(number)
    }

    pub fn count(&self) -> usize {
        self.slot_count
    }

    /// Handler address for interrupt `number`, if installed.
    pub fn handler(&self, number: u32) -> Option<u32> {
        self.slots.get(number as usize).copied()
    }

    /// Shared handle for interrupt sources.
    pub fn line(&self) -> Arc<InterruptLine> {
        Arc::clone(&self.line)
    }

    pub fn take_pending(&self) -> Option<u32> {
        self.line.take_pending()
    }
}

impl Default for InterruptVector {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}
