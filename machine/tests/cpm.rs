//! CP/M diagnostic harness.
//!
//! Runs the classic TST8080 diagnostic against a BDOS console stub when
//! the program image is available on disk. Point `CPM_PROGRAMS_DIR` at a
//! directory holding `TST8080.COM`, or drop it in `tests/programs/`.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{CpmIoController, RamController, BDOS_STUB};
use machine_i8080::Machine;

fn tst8080_image() -> Option<Vec<u8>> {
    let path = std::env::var_os("CPM_PROGRAMS_DIR")
        .map(|dir| PathBuf::from(dir).join("TST8080.COM"))
        .unwrap_or_else(|| PathBuf::from("tests/programs/TST8080.COM"));
    std::fs::read(path).ok()
}

#[test]
fn tst8080_reports_operational() {
    let Some(image) = tst8080_image() else {
        eprintln!("TST8080.COM not found, skipping the CP/M diagnostic");
        return;
    };

    let memory = Arc::new(RamController::new());
    // CP/M warm boot: jumping to 0x0000 stops the machine.
    memory.load(0x0000, &[0x76]);
    // BDOS entry: forward console calls to the I/O controller.
    memory.load(0x0005, &BDOS_STUB);
    memory.load(0x0100, &image);

    let console = Arc::new(CpmIoController::new(memory.clone()));

    let mut machine = Machine::new(None).unwrap();
    machine.set_memory_controller(memory).unwrap();
    machine.set_io_controller(console.clone()).unwrap();

    machine.run(0x0100).unwrap();

    let message = console.message();
    assert!(
        message.contains("CPU IS OPERATIONAL"),
        "diagnostic failed: {message}"
    );
}
