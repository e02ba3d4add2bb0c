//! Downward-growing stack over any [`Memory`].
//!
//! The stack itself is a thin view: the pointer usually lives in a register
//! and is copied in and out around each operation.

use crate::cpu::memory::{Memory, MemoryError};
use thiserror::Error;

pub struct Stack<'m, M: Memory + ?Sized> {
    mem: &'m mut M,
    base: u32,
    pointer: u32,
    word_size: u32,
    size: Option<u32>,
}

impl<'m, M: Memory + ?Sized> Stack<'m, M> {
    /// Empty stack at `base`.
    pub fn new(mem: &'m mut M, base: u32, word_size: u32) -> Self {
        Self { mem, base, pointer: base, word_size, size: None }
    }

    /// Stack at `base` whose top is currently `pointer`.
    pub fn with_pointer(mem: &'m mut M, base: u32, pointer: u32, word_size: u32) -> Self {
        Self { mem, base, pointer, word_size, size: None }
    }

    /// Limit the stack to `size` bytes below its base.
    pub fn set_size(&mut self, size: Option<u32>) {
        self.size = size;
    }

    pub fn pointer(&self) -> u32 {
        self.pointer
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Move the (now empty) stack to `pos`.
    pub fn relocate(&mut self, pos: u32) {
        self.base = pos;
        self.pointer = pos;
    }

    pub fn push(&mut self, value: u32) -> Result<(), StackError> {
        if let Some(size) = self.size {
            let bottom = i64::from(self.base) - i64::from(size);
            if i64::from(self.pointer) - i64::from(self.word_size) < bottom {
                return Err(StackError::Overflow { pointer: self.pointer });
            }
        }
        self.pointer = self.pointer.wrapping_sub(self.word_size);
        self.mem.set_data(self.pointer, u64::from(value), self.word_size as usize)?;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u32, StackError> {
        if self.size.is_some() && self.pointer >= self.base {
            return Err(StackError::Underflow { pointer: self.pointer });
        }
        let value = self.mem.get_data(self.pointer, self.word_size as usize)? as u32;
        self.pointer = self.pointer.wrapping_add(self.word_size);
        Ok(value)
    }
}

/// Errors raised by stack operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("stack overflow at {pointer:#x}")]
    Overflow { pointer: u32 },

    #[error("stack underflow at {pointer:#x}")]
    Underflow { pointer: u32 },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}
