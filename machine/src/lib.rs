//! Programmable Intel 8080 machine.
//!
//! A host supplies memory and I/O controllers, configures the machine
//! through a JSON option document, and drives it synchronously or on a
//! background worker. The machine arbitrates the system bus between the
//! CPU and the controllers, paces execution against the wall clock,
//! routes interrupts, and checkpoints the full machine state on request.

mod clock;
mod machine;
mod opt;
mod state;

pub use clock::CpuClock;
pub use machine::Machine;
pub use opt::Opt;
pub use state::{bin_to_txt, rom_digest, txt_to_bin};

pub use emu80_core::{Controller, Isr, MachineError, Signal, SystemBus};
