//! Core types for the 8080 machine emulator engine.
//!
//! The machine, the CPU and the host-supplied controllers all meet here:
//! the system bus the CPU and machine loop share, the controller capability
//! the host implements, the interrupt service request enumeration, and the
//! error codes every fallible operation reports.

mod bus;
mod controller;
mod error;
mod isr;

pub use bus::{BusChannel, ControlBus, Signal, SystemBus};
pub use controller::Controller;
pub use error::MachineError;
pub use isr::Isr;
