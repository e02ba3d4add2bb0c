//! Peripherals attached around the CPU core: a periodic interrupt clock and
//! a memory-mapped terminal.

pub mod clock;
pub mod terminal;

pub use clock::Clock;
pub use terminal::Terminal;
