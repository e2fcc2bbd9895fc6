//! The device capability the host supplies to the machine.

use crate::Isr;

/// A device that can interact with the CPU: memory and I/O controllers
/// share this shape.
///
/// `read` and `write` must be lightweight and never block; blocking here
/// stalls the CPU pipeline and slows the emulated program. The machine
/// invokes controllers only from the loop thread; hosts keep their own
/// handle and must not mutate a controller while the machine is running.
pub trait Controller: Send + Sync {
    /// Read a byte from the device at a 16-bit address.
    fn read(&self, address: u16) -> u8;

    /// Write a byte to the device at a 16-bit address.
    fn write(&self, address: u16, value: u8);

    /// Poll the device for pending interrupts.
    ///
    /// Called on the I/O controller at the interrupt-service cadence with
    /// the simulated machine time and the total elapsed CPU cycles.
    /// `Isr::Quit` exits the machine loop.
    fn service_interrupts(&self, _now_ns: u64, _cycles: u64) -> Isr {
        Isr::NoInterrupt
    }

    /// Stable 16-byte identity used to match save states to devices.
    fn uuid(&self) -> [u8; 16];
}
