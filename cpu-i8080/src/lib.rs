//! Intel 8080 CPU core.
//!
//! The CPU does not own the system bus; the machine lends it for the
//! duration of each `step()`. Multi-cycle instructions suspend at every
//! bus transaction and resume on the next step, which lets the machine
//! interleave CPU progress with controller dispatch on a single thread.

mod alu;
mod cpu;
mod flags;
mod registers;

pub use cpu::{Intel8080, RegisterSnapshot, Snapshot};
pub use flags::{AC, CF, PF, SF, STATUS_RESET, ZF};
pub use registers::Registers;
