//! Single-slot channels shared between the CPU and the machine loop.
//!
//! The CPU does not own the bus. The machine owns it and lends it to the
//! CPU for the duration of one step; the machine loop then services
//! whatever the CPU posted. `step` and controller dispatch never
//! interleave, so no locking is required.

use bitflags::bitflags;

bitflags! {
    /// Control-channel signal lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Signal: u8 {
        /// The CPU requests a byte from the memory controller.
        const MEMORY_READ = 1 << 0;
        /// The CPU hands a byte to the memory controller.
        const MEMORY_WRITE = 1 << 1;
        /// The CPU requests a byte from the I/O controller.
        const IO_READ = 1 << 2;
        /// The CPU hands a byte to the I/O controller.
        const IO_WRITE = 1 << 3;
        /// The machine loop offers an interrupt vector on the data channel.
        const INTERRUPT = 1 << 4;
        /// The machine loop exits once this latches.
        const POWER_OFF = 1 << 5;
        /// Clock synchronisation line.
        const CLOCK = 1 << 6;
    }
}

/// Single-value mailbox for the address and data channels.
///
/// `send` overwrites the slot; `receive` reads it non-destructively.
/// There is no buffering and no ordering between channels; the machine
/// loop observes them in a fixed sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusChannel<T: Copy + Default> {
    value: T,
}

impl<T: Copy + Default> BusChannel<T> {
    pub fn send(&mut self, value: T) {
        self.value = value;
    }

    #[must_use]
    pub const fn receive(&self) -> T {
        self.value
    }
}

/// The control channel: a set of latched signals.
///
/// `send` ORs a signal in; `receive` reads one signal and clears it in the
/// same operation.
#[derive(Debug, Default)]
pub struct ControlBus {
    signals: Signal,
}

impl ControlBus {
    pub fn send(&mut self, signal: Signal) {
        self.signals |= signal;
    }

    /// Returns whether `signal` was latched, clearing it.
    pub fn receive(&mut self, signal: Signal) -> bool {
        let latched = self.signals.contains(signal);
        self.signals.remove(signal);
        latched
    }
}

/// The synthetic system bus: 16-bit address, 8-bit data, control signals.
#[derive(Debug, Default)]
pub struct SystemBus {
    pub address: BusChannel<u16>,
    pub data: BusChannel<u8>,
    pub control: ControlBus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_receive_clears_one_signal() {
        let mut control = ControlBus::default();
        control.send(Signal::MEMORY_READ | Signal::INTERRUPT);

        assert!(control.receive(Signal::MEMORY_READ));
        assert!(!control.receive(Signal::MEMORY_READ));
        assert!(control.receive(Signal::INTERRUPT));
    }

    #[test]
    fn data_channel_overwrites() {
        let mut data = BusChannel::<u8>::default();
        data.send(0x12);
        data.send(0x34);
        assert_eq!(data.receive(), 0x34);
        assert_eq!(data.receive(), 0x34);
    }
}
