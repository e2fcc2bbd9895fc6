//! The machine: bus arbitration, interrupt routing, pacing and
//! checkpointing around a single 8080 core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use cpu_i8080::Intel8080;
use emu80_core::{Controller, Isr, MachineError, Signal, SystemBus};

use crate::clock::CpuClock;
use crate::opt::Opt;
use crate::state::{bin_to_txt, rom_digest, txt_to_bin, MemoryDocument, RamDocument, SaveDocument};

/// Nominal 8080 clock frequency.
const CPU_FREQUENCY_HZ: u64 = 2_000_000;

type SaveHandler = Arc<dyn Fn(&str) + Send + Sync>;
type LoadHandler = Arc<dyn Fn() -> String + Send + Sync>;

/// The parts that travel to the worker thread for an async run.
struct Board {
    cpu: Intel8080,
    bus: SystemBus,
    clock: CpuClock,
}

/// Everything the run loop needs besides the board itself.
struct LoopContext {
    memory: Arc<dyn Controller>,
    io: Arc<dyn Controller>,
    on_save: Option<SaveHandler>,
    on_load: Option<LoadHandler>,
    load_async: bool,
    save_async: bool,
    encoder: String,
    compressor: String,
    rom: Vec<(u16, u16)>,
    ram: Vec<(u16, u16)>,
    /// Interrupt-service cadence in T-states; zero disables polling.
    ticks_per_isr: u64,
}

/// A programmable 8080 machine.
///
/// Controllers, options and callbacks may only change while the machine
/// is stopped; every setter reports `Busy` otherwise. After an async run
/// the machine stays busy until `wait_for_completion` reaps the worker.
pub struct Machine {
    opt: Opt,
    board: Option<Board>,
    memory: Option<Arc<dyn Controller>>,
    io: Option<Arc<dyn Controller>>,
    on_save: Option<SaveHandler>,
    on_load: Option<LoadHandler>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<(Board, u64)>>,
}

impl Machine {
    /// Build a machine from an option document (raw JSON or
    /// `file://<path>`), applying defaults for anything unspecified.
    /// The CPU model defaults to `"i8080"`, the only supported value.
    pub fn new(options: Option<&str>) -> Result<Self, MachineError> {
        let mut opt = Opt::default();
        opt.set_options(options)?;

        if opt.cpu_type().is_none() {
            opt.set_options(Some(r#"{"cpu":"i8080"}"#))?;
        }
        if opt.cpu_type() != Some("i8080") {
            return Err(MachineError::InvalidArgument);
        }

        Ok(Self {
            opt,
            board: Some(Board {
                cpu: Intel8080::new(),
                bus: SystemBus::default(),
                clock: CpuClock::new(CPU_FREQUENCY_HZ),
            }),
            memory: None,
            io: None,
            on_save: None,
            on_load: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Merge an option document. `None` restores defaults.
    pub fn set_options(&mut self, options: Option<&str>) -> Result<(), MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        self.opt.set_options(options)
    }

    /// Attach the memory controller.
    pub fn set_memory_controller(
        &mut self,
        controller: Arc<dyn Controller>,
    ) -> Result<(), MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        self.memory = Some(controller);
        Ok(())
    }

    /// Attach the I/O controller.
    pub fn set_io_controller(
        &mut self,
        controller: Arc<dyn Controller>,
    ) -> Result<(), MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        self.io = Some(controller);
        Ok(())
    }

    /// Install the handler that receives save-state documents.
    pub fn on_save(
        &mut self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<(), MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        self.on_save = Some(Arc::new(handler));
        Ok(())
    }

    /// Install the handler that supplies a save-state document to load.
    pub fn on_load(
        &mut self,
        handler: impl Fn() -> String + Send + Sync + 'static,
    ) -> Result<(), MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        self.on_load = Some(Arc::new(handler));
        Ok(())
    }

    /// Run the machine from `pc` until the I/O controller requests Quit
    /// (or the CPU halts).
    ///
    /// Synchronous launch returns the simulated run duration in
    /// nanoseconds. With `runAsync` the loop moves to a worker thread,
    /// `run` returns 0 immediately, and `wait_for_completion` reports the
    /// duration. Both controllers must be attached; anything else is a
    /// hard error before any state is touched.
    pub fn run(&mut self, pc: u16) -> Result<u64, MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        let memory = self.memory.clone().ok_or(MachineError::InvalidArgument)?;
        let io = self.io.clone().ok_or(MachineError::InvalidArgument)?;
        let mut board = self.board.take().ok_or(MachineError::NoClock)?;

        board.cpu.reset(pc);
        board.bus = SystemBus::default();
        board.clock.reset();
        if let Err(err) = board
            .clock
            .set_tick_resolution(self.opt.clock_resolution())
        {
            warn!(%err, "pacing fidelity reduced, execution proceeds");
        }

        let resolution = board.clock.resolution_in_tstates();
        let isr_freq = self.opt.isr_freq();
        let ticks_per_isr = if isr_freq > 0.0 {
            ((isr_freq * resolution as f64).round() as u64).max(1)
        } else {
            0
        };

        let context = LoopContext {
            memory,
            io,
            on_save: self.on_save.clone(),
            on_load: self.on_load.clone(),
            load_async: self.opt.load_async(),
            save_async: self.opt.save_async(),
            encoder: self.opt.encoder(),
            compressor: self.opt.compressor(),
            rom: self.opt.rom(),
            ram: self.opt.ram(),
            ticks_per_isr,
        };

        self.running.store(true, Ordering::Release);

        if self.opt.run_async() {
            self.worker = Some(thread::spawn(move || machine_loop(board, context)));
            Ok(0)
        } else {
            let (board, duration) = machine_loop(board, context);
            self.board = Some(board);
            self.running.store(false, Ordering::Release);
            Ok(duration)
        }
    }

    /// Block until an async run finishes; returns the simulated duration.
    /// A no-op returning 0 when no run is outstanding.
    pub fn wait_for_completion(&mut self) -> u64 {
        let Some(worker) = self.worker.take() else {
            return 0;
        };
        match worker.join() {
            Ok((board, duration)) => {
                self.board = Some(board);
                self.running.store(false, Ordering::Release);
                duration
            }
            Err(_) => {
                warn!("machine loop worker panicked");
                self.running.store(false, Ordering::Release);
                0
            }
        }
    }

    /// Produce the full save-state document for the stopped machine.
    pub fn save(&self) -> Result<String, MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        let board = self.board.as_ref().ok_or(MachineError::Busy)?;
        let memory = self.memory.as_ref().ok_or(MachineError::InvalidArgument)?;
        build_save_document(
            &board.cpu,
            memory.as_ref(),
            &self.opt.encoder(),
            &self.opt.compressor(),
            &self.opt.rom(),
            &self.opt.ram(),
        )
    }

    /// The CPU state document of the stopped machine.
    pub fn get_state(&self) -> Result<String, MachineError> {
        if self.is_running() {
            return Err(MachineError::Busy);
        }
        self.board.as_ref().ok_or(MachineError::Busy)?.cpu.save()
    }
}

/// Drive the CPU until the control bus latches PowerOff.
fn machine_loop(mut board: Board, context: LoopContext) -> (Board, u64) {
    let mut total: u64 = 0;
    let mut last: u64 = 0;
    let mut now_ns: u64 = 0;
    let mut pending_load: Option<JoinHandle<String>> = None;
    let mut pending_save: Option<JoinHandle<()>> = None;

    while !board.bus.control.receive(Signal::POWER_OFF) {
        let tstates = board.cpu.step(&mut board.bus);
        service_controllers(
            &mut board.bus,
            context.memory.as_ref(),
            context.io.as_ref(),
        );
        now_ns = board.clock.tick(u64::from(tstates));
        total += u64::from(tstates);

        if context.ticks_per_isr > 0 && total - last >= context.ticks_per_isr {
            match context.io.service_interrupts(now_ns, total) {
                isr @ (Isr::Zero
                | Isr::One
                | Isr::Two
                | Isr::Three
                | Isr::Four
                | Isr::Five
                | Isr::Six
                | Isr::Seven) => {
                    board.bus.control.send(Signal::INTERRUPT);
                    board.bus.data.send(isr.vector().unwrap_or(0));
                }
                Isr::Load => {
                    begin_load(&mut board, &context, &mut pending_load, &pending_save);
                }
                Isr::Save => {
                    begin_save(&board, &context, &pending_load, &mut pending_save);
                }
                Isr::Quit => {
                    drain_handlers(&mut board, &context, &mut pending_load, &mut pending_save);
                    board.bus.control.send(Signal::POWER_OFF);
                }
                Isr::NoInterrupt => {
                    reap_handlers(&mut board, &context, &mut pending_load, &mut pending_save);
                }
            }
            last = total;
        }
    }

    // The loop can also end on a CPU halt; never leave a handler running.
    drain_handlers(&mut board, &context, &mut pending_load, &mut pending_save);

    (board, now_ns)
}

/// Dispatch any bus transaction the CPU posted into the controllers.
fn service_controllers(bus: &mut SystemBus, memory: &dyn Controller, io: &dyn Controller) {
    if bus.control.receive(Signal::MEMORY_READ) {
        let value = memory.read(bus.address.receive());
        bus.data.send(value);
    }
    if bus.control.receive(Signal::MEMORY_WRITE) {
        memory.write(bus.address.receive(), bus.data.receive());
    }
    if bus.control.receive(Signal::IO_READ) {
        let value = io.read(bus.address.receive());
        bus.data.send(value);
    }
    if bus.control.receive(Signal::IO_WRITE) {
        io.write(bus.address.receive(), bus.data.receive());
    }
}

/// Start servicing a load request, unless one of either kind is already
/// in flight (state snapshots must linearise against the CPU, so the
/// newcomer is dropped).
fn begin_load(
    board: &mut Board,
    context: &LoopContext,
    pending_load: &mut Option<JoinHandle<String>>,
    pending_save: &Option<JoinHandle<()>>,
) {
    let Some(handler) = &context.on_load else {
        return;
    };
    if pending_load.is_some() || pending_save.is_some() {
        debug!("load request dropped, a save or load is already in flight");
        return;
    }

    if context.load_async {
        let handler = handler.clone();
        *pending_load = Some(thread::spawn(move || handler()));
    } else {
        let json = handler();
        if let Err(err) = apply_load(board, context, &json) {
            warn!(%err, "discarding machine state load");
        }
    }
}

/// Serialize the machine state and hand it to the save handler, unless a
/// save or load is already in flight.
fn begin_save(
    board: &Board,
    context: &LoopContext,
    pending_load: &Option<JoinHandle<String>>,
    pending_save: &mut Option<JoinHandle<()>>,
) {
    let Some(handler) = &context.on_save else {
        return;
    };
    if pending_load.is_some() || pending_save.is_some() {
        debug!("save request dropped, a save or load is already in flight");
        return;
    }

    match build_save_document(
        &board.cpu,
        context.memory.as_ref(),
        &context.encoder,
        &context.compressor,
        &context.rom,
        &context.ram,
    ) {
        Ok(json) => {
            if context.save_async {
                let handler = handler.clone();
                *pending_save = Some(thread::spawn(move || handler(&json)));
            } else {
                handler(&json);
            }
        }
        Err(err) => warn!(%err, "machine state save failed"),
    }
}

/// Non-blocking reap of finished handler workers.
fn reap_handlers(
    board: &mut Board,
    context: &LoopContext,
    pending_load: &mut Option<JoinHandle<String>>,
    pending_save: &mut Option<JoinHandle<()>>,
) {
    if pending_load.as_ref().is_some_and(JoinHandle::is_finished) {
        if let Some(worker) = pending_load.take() {
            match worker.join() {
                Ok(json) => {
                    if let Err(err) = apply_load(board, context, &json) {
                        warn!(%err, "discarding machine state load");
                    }
                }
                Err(_) => warn!("load handler panicked"),
            }
        }
    }

    if pending_save.as_ref().is_some_and(JoinHandle::is_finished) {
        if let Some(worker) = pending_save.take() {
            if worker.join().is_err() {
                warn!("save handler panicked");
            }
        }
    }
}

/// Blocking wait for outstanding handlers, used on Quit.
fn drain_handlers(
    board: &mut Board,
    context: &LoopContext,
    pending_load: &mut Option<JoinHandle<String>>,
    pending_save: &mut Option<JoinHandle<()>>,
) {
    if let Some(worker) = pending_load.take() {
        match worker.join() {
            Ok(json) => {
                if let Err(err) = apply_load(board, context, &json) {
                    warn!(%err, "discarding machine state load");
                }
            }
            Err(_) => warn!("load handler panicked"),
        }
    }

    if let Some(worker) = pending_save.take() {
        if worker.join().is_err() {
            warn!("save handler panicked");
        }
    }
}

/// Read the bytes of a set of (offset, size) regions through a controller.
fn read_regions(memory: &dyn Controller, meta: &[(u16, u16)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for &(offset, size) in meta {
        for address in u32::from(offset)..u32::from(offset) + u32::from(size) {
            bytes.push(memory.read(address as u16));
        }
    }
    bytes
}

/// Serialize CPU and configured memory regions into the save document.
fn build_save_document(
    cpu: &Intel8080,
    memory: &dyn Controller,
    encoder: &str,
    compressor: &str,
    rom_meta: &[(u16, u16)],
    ram_meta: &[(u16, u16)],
) -> Result<String, MachineError> {
    if encoder != "base64" {
        return Err(MachineError::JsonConfig);
    }
    let uuid = memory.uuid();
    if uuid == [0u8; 16] {
        return Err(MachineError::IncompatibleUuid);
    }

    let rom = read_regions(memory, rom_meta);
    let ram = read_regions(memory, ram_meta);

    let document = SaveDocument {
        cpu: cpu.snapshot(),
        memory: MemoryDocument {
            uuid: BASE64.encode(uuid),
            rom: BASE64.encode(rom_digest(&rom)),
            ram: RamDocument {
                encoder: encoder.to_owned(),
                compressor: compressor.to_owned(),
                size: ram.len() as u32,
                bytes: bin_to_txt(encoder, compressor, &ram)?,
            },
        },
    };

    serde_json::to_string(&document).map_err(|_| MachineError::JsonParse)
}

/// Validate a save document against this machine and apply it.
///
/// A load applies only when the memory UUID, ROM digest and RAM layout
/// all match; otherwise it is discarded and the mismatch reported.
fn apply_load(board: &mut Board, context: &LoopContext, json: &str) -> Result<(), MachineError> {
    if json.is_empty() {
        return Ok(());
    }

    let memory_uuid = context.memory.uuid();
    if memory_uuid == [0u8; 16] {
        return Err(MachineError::IncompatibleUuid);
    }

    let document: SaveDocument =
        serde_json::from_str(json).map_err(|_| MachineError::JsonParse)?;

    let uuid = BASE64
        .decode(&document.memory.uuid)
        .map_err(|_| MachineError::JsonParse)?;
    if uuid != memory_uuid {
        return Err(MachineError::IncompatibleUuid);
    }

    let rom = read_regions(context.memory.as_ref(), &context.rom);
    let digest = BASE64
        .decode(&document.memory.rom)
        .map_err(|_| MachineError::JsonParse)?;
    if digest != rom_digest(&rom) {
        return Err(MachineError::IncompatibleRom);
    }

    let ram_document = &document.memory.ram;
    let ram = txt_to_bin(
        &ram_document.encoder,
        &ram_document.compressor,
        ram_document.size as usize,
        &ram_document.bytes,
    )?;
    let layout: usize = context.ram.iter().map(|&(_, size)| usize::from(size)).sum();
    if ram.len() != layout || ram.len() != ram_document.size as usize {
        return Err(MachineError::IncompatibleRam);
    }

    // All checks passed: restore the CPU, then the RAM regions.
    board.cpu.load_snapshot(&document.cpu)?;

    let mut index = 0;
    for &(offset, size) in &context.ram {
        for address in u32::from(offset)..u32::from(offset) + u32::from(size) {
            context.memory.write(address as u16, ram[index]);
            index += 1;
        }
    }

    Ok(())
}
