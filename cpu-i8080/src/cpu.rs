//! 8080 CPU core with cooperative bus stepping.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use emu80_core::{MachineError, Signal, SystemBus};

use crate::registers::Registers;

/// Where the CPU is between calls to `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between instructions; the next step posts a fetch or acknowledges
    /// a pending interrupt.
    Idle,
    /// A fetch has been posted; the next step latches the opcode.
    FetchPending,
    /// An instruction is in flight.
    Executing,
}

/// What one execution stage asks of the machine loop.
///
/// Every bus transaction is a suspension point: the stage posts the
/// request and the CPU yields until the loop has serviced it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Step {
    /// Post a read at the address and suspend.
    Read(Signal, u16),
    /// Post a write of the value at the address and suspend.
    Write(Signal, u16, u8),
    /// The instruction has retired.
    Done,
}

/// Intel 8080.
///
/// `step()` advances the CPU by one suspension point and returns the
/// number of T-states retired since the previous call: zero while a fetch
/// or any bus transaction is outstanding, the full documented count when
/// the instruction retires.
pub struct Intel8080 {
    pub(crate) regs: Registers,
    /// Interrupt enable latch.
    pub(crate) iff: bool,
    /// Set by HLT; the next fetch latches PowerOff instead.
    pub(crate) halted: bool,
    /// Latched opcode of the in-flight instruction.
    pub(crate) opcode: u8,
    /// Accepted interrupt vector awaiting service.
    pending_isr: Option<u8>,
    phase: Phase,
    /// Continuation counter within the in-flight instruction.
    pub(crate) stage: u8,
    /// Scratch address latched across suspension points.
    pub(crate) addr: u16,
    /// Scratch data bytes latched across suspension points.
    pub(crate) lo: u8,
    pub(crate) hi: u8,
    /// T-state cost of the in-flight instruction.
    pub(crate) tstates: u8,
    total_tstates: u64,
}

/// Stable identity of this CPU model, carried in snapshots.
const UUID: [u8; 16] = [
    0x25, 0x9F, 0x81, 0x4C, 0x0E, 0xD6, 0x47, 0xB2, 0x9A, 0x5D, 0x1C, 0x83, 0x77, 0x04, 0xE1,
    0x3F,
];

/// Register portion of a CPU snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub s: u8,
}

/// A complete CPU snapshot as carried in save-state documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Base64 of the CPU model identity.
    pub uuid: String,
    pub registers: RegisterSnapshot,
    pub pc: u16,
    pub sp: u16,
}

impl Intel8080 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            iff: false,
            halted: false,
            opcode: 0,
            pending_isr: None,
            phase: Phase::Idle,
            stage: 0,
            addr: 0,
            lo: 0,
            hi: 0,
            tstates: 0,
            total_tstates: 0,
        }
    }

    /// Power on: registers zeroed, status to its reset value, SP zero,
    /// execution to begin at `pc`.
    pub fn reset(&mut self, pc: u16) {
        self.regs = Registers::default();
        self.regs.pc = pc;
        self.iff = false;
        self.halted = false;
        self.opcode = 0;
        self.pending_isr = None;
        self.phase = Phase::Idle;
        self.stage = 0;
        self.addr = 0;
        self.lo = 0;
        self.hi = 0;
        self.tstates = 0;
        self.total_tstates = 0;
    }

    /// Advance by one suspension point.
    ///
    /// Between instructions this inspects the control bus: an offered
    /// interrupt vector is always consumed, and is latched for service
    /// only if the interrupt enable latch was set (which it then clears).
    /// A latched vector replaces the next fetch with the equivalent
    /// restart instruction.
    pub fn step(&mut self, bus: &mut SystemBus) -> u8 {
        match self.phase {
            Phase::Idle => {
                if bus.control.receive(Signal::INTERRUPT) {
                    let vector = bus.data.receive();
                    if self.iff {
                        self.pending_isr = Some(vector & 0x07);
                        self.iff = false;
                    }
                }

                if let Some(vector) = self.pending_isr.take() {
                    self.halted = false;
                    self.opcode = 0xC7 | (vector << 3);
                    self.stage = 0;
                    self.phase = Phase::Executing;
                    return self.run(bus);
                }

                if self.halted {
                    bus.control.send(Signal::POWER_OFF);
                    return 0;
                }

                bus.control.send(Signal::MEMORY_READ);
                bus.address.send(self.regs.pc);
                self.phase = Phase::FetchPending;
                0
            }
            Phase::FetchPending => {
                self.opcode = bus.data.receive();
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.stage = 0;
                self.phase = Phase::Executing;
                self.run(bus)
            }
            Phase::Executing => self.run(bus),
        }
    }

    /// Run one stage of the in-flight instruction and service its request.
    fn run(&mut self, bus: &mut SystemBus) -> u8 {
        match self.execute(bus) {
            Step::Read(signal, address) => {
                bus.control.send(signal);
                bus.address.send(address);
                0
            }
            Step::Write(signal, address, value) => {
                bus.control.send(signal);
                bus.address.send(address);
                bus.data.send(value);
                0
            }
            Step::Done => {
                self.phase = Phase::Idle;
                // Restarts, synthesised or genuine, are billed as zero.
                let retired = if self.opcode & 0xC7 == 0xC7 { 0 } else { self.tstates };
                self.total_tstates += u64::from(retired);
                retired
            }
        }
    }

    /// True between instructions.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// True once HLT has retired and the CPU is stopped.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Current program counter.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.regs.pc
    }

    /// Snapshot of the register file.
    #[must_use]
    pub const fn registers(&self) -> Registers {
        self.regs
    }

    /// Interrupt enable latch.
    #[must_use]
    pub const fn iff(&self) -> bool {
        self.iff
    }

    /// T-states retired since power-on, restarts excluded.
    #[must_use]
    pub const fn total_tstates(&self) -> u64 {
        self.total_tstates
    }

    /// Snapshot the architectural state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            uuid: BASE64.encode(UUID),
            registers: RegisterSnapshot {
                a: self.regs.a,
                b: self.regs.b,
                c: self.regs.c,
                d: self.regs.d,
                e: self.regs.e,
                h: self.regs.h,
                l: self.regs.l,
                s: self.regs.s,
            },
            pc: self.regs.pc,
            sp: self.regs.sp,
        }
    }

    /// Serialize the architectural state as JSON.
    pub fn save(&self) -> Result<String, MachineError> {
        serde_json::to_string(&self.snapshot()).map_err(|_| MachineError::JsonParse)
    }

    /// Restore architectural state from a snapshot.
    ///
    /// Rejected when the snapshot's identity does not match this CPU
    /// model. The status byte is masked so the hardwired bits survive.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), MachineError> {
        let uuid = BASE64
            .decode(&snapshot.uuid)
            .map_err(|_| MachineError::JsonParse)?;
        if uuid != UUID {
            return Err(MachineError::IncompatibleUuid);
        }

        let r = &snapshot.registers;
        self.regs.a = r.a;
        self.regs.b = r.b;
        self.regs.c = r.c;
        self.regs.d = r.d;
        self.regs.e = r.e;
        self.regs.h = r.h;
        self.regs.l = r.l;
        self.regs.set_status(r.s);
        self.regs.pc = snapshot.pc;
        self.regs.sp = snapshot.sp;
        Ok(())
    }

    /// Restore architectural state from a JSON document.
    pub fn load(&mut self, json: &str) -> Result<(), MachineError> {
        let snapshot: Snapshot =
            serde_json::from_str(json).map_err(|_| MachineError::JsonParse)?;
        self.load_snapshot(&snapshot)
    }
}

impl Default for Intel8080 {
    fn default() -> Self {
        Self::new()
    }
}

// Instruction execution split into a separate file for readability.
mod execute;
