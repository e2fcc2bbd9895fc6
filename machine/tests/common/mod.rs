//! Test controllers shared by the machine integration tests.

#![allow(dead_code)] // Not every test file uses every controller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use emu80_core::{Controller, Isr};

/// Flat 64K memory controller with host-side load/peek access.
pub struct RamController {
    bytes: Mutex<Vec<u8>>,
    uuid: [u8; 16],
}

impl RamController {
    pub fn new() -> Self {
        Self::with_uuid([
            0xCD, 0x18, 0xD8, 0x67, 0xDD, 0xBF, 0x4D, 0xAA, 0xAD, 0x5A, 0xBA, 0x1C, 0xEB, 0xAE,
            0xB0, 0x31,
        ])
    }

    pub fn with_uuid(uuid: [u8; 16]) -> Self {
        Self {
            bytes: Mutex::new(vec![0; 0x10000]),
            uuid,
        }
    }

    pub fn load(&self, address: u16, data: &[u8]) {
        let mut bytes = self.bytes.lock().unwrap();
        let start = address as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn peek(&self, address: u16) -> u8 {
        self.bytes.lock().unwrap()[address as usize]
    }

    pub fn clear(&self) {
        self.bytes.lock().unwrap().fill(0);
    }
}

impl Controller for RamController {
    fn read(&self, address: u16) -> u8 {
        self.bytes.lock().unwrap()[address as usize]
    }

    fn write(&self, address: u16, value: u8) {
        self.bytes.lock().unwrap()[address as usize] = value;
    }

    fn uuid(&self) -> [u8; 16] {
        self.uuid
    }
}

/// I/O controller that replays a script of interrupt requests.
///
/// Each entry fires once, in order, as soon as the elapsed cycle count
/// reaches its threshold. Ports behave as plain byte latches.
pub struct ScriptedIoController {
    script: Mutex<Vec<(u64, Isr)>>,
    polls: AtomicUsize,
    ports: Mutex<[u8; 256]>,
}

impl ScriptedIoController {
    pub fn new(script: Vec<(u64, Isr)>) -> Self {
        Self {
            script: Mutex::new(script),
            polls: AtomicUsize::new(0),
            ports: Mutex::new([0; 256]),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn port(&self, port: u8) -> u8 {
        self.ports.lock().unwrap()[port as usize]
    }
}

impl Controller for ScriptedIoController {
    fn read(&self, address: u16) -> u8 {
        self.ports.lock().unwrap()[address as usize & 0xFF]
    }

    fn write(&self, address: u16, value: u8) {
        self.ports.lock().unwrap()[address as usize & 0xFF] = value;
    }

    fn service_interrupts(&self, _now_ns: u64, cycles: u64) -> Isr {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if let Some(&(at, isr)) = script.first() {
            if cycles >= at {
                script.remove(0);
                return isr;
            }
        }
        Isr::NoInterrupt
    }

    fn uuid(&self) -> [u8; 16] {
        [0xE8; 16]
    }
}

/// BDOS stub installed at 0x0005. It forwards the function number and DE
/// to the console controller one OUT at a time:
///
/// ```text
/// MOV A,C / OUT 0   ; function (2 = char in E, 9 = '$'-terminated string at DE)
/// MOV A,D / OUT 1
/// MOV A,E / OUT 2   ; triggers the console action
/// RET
/// ```
pub const BDOS_STUB: [u8; 10] = [0x79, 0xD3, 0x00, 0x7A, 0xD3, 0x01, 0x7B, 0xD3, 0x02, 0xC9];

/// CP/M-style console: captures BDOS print calls into a message buffer.
pub struct CpmIoController {
    memory: Arc<RamController>,
    function: Mutex<u8>,
    high: Mutex<u8>,
    message: Mutex<String>,
}

impl CpmIoController {
    pub fn new(memory: Arc<RamController>) -> Self {
        Self {
            memory,
            function: Mutex::new(0),
            high: Mutex::new(0),
            message: Mutex::new(String::new()),
        }
    }

    pub fn message(&self) -> String {
        self.message.lock().unwrap().clone()
    }
}

impl Controller for CpmIoController {
    fn read(&self, _address: u16) -> u8 {
        0
    }

    fn write(&self, address: u16, value: u8) {
        match address & 0xFF {
            0 => *self.function.lock().unwrap() = value,
            1 => *self.high.lock().unwrap() = value,
            2 => {
                let function = *self.function.lock().unwrap();
                let mut message = self.message.lock().unwrap();
                match function {
                    2 => message.push(char::from(value)),
                    9 => {
                        let mut address =
                            u16::from(*self.high.lock().unwrap()) << 8 | u16::from(value);
                        loop {
                            let byte = self.memory.peek(address);
                            if byte == b'$' {
                                break;
                            }
                            message.push(char::from(byte));
                            address = address.wrapping_add(1);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn uuid(&self) -> [u8; 16] {
        [0x3B; 16]
    }
}
