//! Host-side test infrastructure.
//!
//! Recording mocks for every hardware capability, plus collaborator mocks
//! and a ready-made engine rig. The diverging capabilities (monitor entry,
//! resume, wait, halt) unwind with a typed payload that [`diverge`] catches,
//! so tests can observe a transfer that would never return on hardware.
//!
//! # Usage
//!
//! ```rust,ignore
//! let rig = EngineRig::new(2);
//! let entered: MonitorEntered = diverge(|| rig.engine.handle_interrupt(&mut frame));
//! ```

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};

use kestrel_common::{
    CoreId, CoreMask, IciKind, InterruptFrame, IrqLine, Polarity, ProcessId, ThreadId, Trigger,
};
use kestrel_hal::{
    ClockSource, CpuControl, InterruptController, IpiBroadcast, LocalInterruptController,
    LocalSource, LocalTimer, MmioBus, MonitorEntry, PortBus, ResumeContext, Route, SchedulerTimer,
};
use spin::Mutex;

use crate::config::EngineConfig;
use crate::cpu::CpuCore;
use crate::engine::{InterruptEngine, Platform};
use crate::event::{CpuCoreEvent, EventKind};
use crate::services::{
    AddressSpace, DeviceIrqHandler, IciConsumer, Services, Symbol, SymbolLookup, SyscallDispatcher,
};
use crate::thread::ThreadRef;

// ---------------------------------------------------------------------------
// Diverging transfers
// ---------------------------------------------------------------------------

/// Payload of [`CpuControl::enter_monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorEntered {
    /// Core that entered.
    pub core: CoreId,
    /// Monitor stack it switched to.
    pub stack_top: usize,
}

/// Payload of [`CpuControl::resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumed {
    /// Core that resumed.
    pub core: CoreId,
    /// Frame that would have been restored.
    pub frame: InterruptFrame,
    /// The frame was restored from the thread's own stack.
    pub in_place: bool,
}

/// Payload of [`CpuControl::wait_for_interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parked {
    /// Core that parked.
    pub core: CoreId,
}

/// Payload of [`CpuControl::halt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halted {
    /// Core that halted.
    pub core: CoreId,
}

/// Runs `f`, which must end in a diverging transfer, and returns the
/// transfer's payload.
///
/// # Panics
///
/// Panics if `f` returns normally or unwinds with a different payload.
pub fn diverge<T: 'static>(f: impl FnOnce()) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => panic!("expected a diverging transfer, returned normally"),
        Err(payload) => match payload.downcast::<T>() {
            Ok(payload) => *payload,
            Err(other) => panic::resume_unwind(other),
        },
    }
}

/// Monitor entry point handed to the engine; the mock CPU never calls it.
pub extern "C" fn test_monitor(_core: usize) -> ! {
    panic!("monitor entry point called on the host");
}

// ---------------------------------------------------------------------------
// CPU
// ---------------------------------------------------------------------------

/// Mock of the executing core.
#[derive(Debug, Default)]
pub struct MockCpu {
    core: AtomicU8,
    interrupts: AtomicBool,
    disables: AtomicUsize,
    fault_address: AtomicU64,
    stack: Mutex<BTreeMap<u64, u64>>,
}

impl MockCpu {
    /// Core 0, interrupts disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local interrupt flag.
    pub fn set_interrupts(&self, enabled: bool) {
        self.interrupts.store(enabled, Ordering::SeqCst);
    }

    /// Number of [`CpuControl::disable_interrupts`] calls so far.
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    /// Selects the executing core.
    pub fn set_core(&self, core: CoreId) {
        self.core.store(core.0, Ordering::SeqCst);
    }

    /// Sets the value [`CpuControl::fault_address`] reports.
    pub fn set_fault_address(&self, addr: u64) {
        self.fault_address.store(addr, Ordering::SeqCst);
    }

    /// Makes one stack word readable.
    pub fn set_stack_word(&self, addr: u64, value: u64) {
        self.stack.lock().insert(addr, value);
    }
}

impl CpuControl for MockCpu {
    fn current_core(&self) -> CoreId {
        CoreId(self.core.load(Ordering::SeqCst))
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn disable_interrupts(&self) -> bool {
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.interrupts.swap(false, Ordering::SeqCst)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            self.interrupts.store(true, Ordering::SeqCst);
        }
    }

    fn fault_address(&self) -> u64 {
        self.fault_address.load(Ordering::SeqCst)
    }

    fn read_stack_word(&self, addr: u64) -> Option<u64> {
        self.stack.lock().get(&addr).copied()
    }

    fn enter_monitor(&self, core: CoreId, stack_top: usize, _entry: MonitorEntry) -> ! {
        panic::panic_any(MonitorEntered { core, stack_top })
    }

    fn resume(&self, core: CoreId, context: ResumeContext) -> ! {
        let (frame, in_place) = match context {
            ResumeContext::Copied(frame) => (frame, false),
            // SAFETY: tests keep captured frames alive until they resume.
            ResumeContext::InPlace(ptr) => (unsafe { *ptr.as_ptr() }, true),
        };
        panic::panic_any(Resumed { core, frame, in_place })
    }

    fn wait_for_interrupt(&self) -> ! {
        panic::panic_any(Parked {
            core: self.current_core(),
        })
    }

    fn halt(&self) -> ! {
        panic::panic_any(Halted {
            core: self.current_core(),
        })
    }
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Settable high-frequency counter.
#[derive(Debug, Clone)]
pub struct MockClock {
    counter: Arc<AtomicU64>,
    frequency: u64,
}

impl MockClock {
    /// Counter at zero running at `frequency` Hz.
    pub fn new(frequency: u64) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(0)),
            frequency,
        }
    }

    /// Sets the raw counter.
    pub fn set(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }

    /// Moves the counter forward.
    pub fn advance(&self, ticks: u64) {
        self.counter.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl ClockSource for MockClock {
    fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }
}

/// One scheduler-timer register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    /// Interrupt disabled.
    Disable,
    /// Comparator programmed.
    Compare(u64),
    /// Interrupt enabled.
    Enable,
}

/// Recording scheduler timer.
#[derive(Debug, Clone, Default)]
pub struct MockSchedulerTimer {
    ops: Arc<Mutex<Vec<TimerOp>>>,
}

impl MockSchedulerTimer {
    /// Accesses so far.
    pub fn ops(&self) -> Vec<TimerOp> {
        self.ops.lock().clone()
    }

    /// Forgets recorded accesses.
    pub fn clear(&self) {
        self.ops.lock().clear();
    }
}

impl SchedulerTimer for MockSchedulerTimer {
    fn disable(&self) {
        self.ops.lock().push(TimerOp::Disable);
    }

    fn set_compare(&self, value: u64) {
        self.ops.lock().push(TimerOp::Compare(value));
    }

    fn enable(&self) {
        self.ops.lock().push(TimerOp::Enable);
    }
}

/// Recording per-core timers.
#[derive(Debug, Clone)]
pub struct MockLocalTimer {
    frequency: u64,
    started: Arc<Mutex<Vec<(CoreId, u64)>>>,
    stops: Arc<Mutex<Vec<CoreId>>>,
}

impl MockLocalTimer {
    /// Timers running at `frequency` Hz.
    pub fn new(frequency: u64) -> Self {
        Self {
            frequency,
            started: Arc::default(),
            stops: Arc::default(),
        }
    }

    /// Every `start` call.
    pub fn started(&self) -> Vec<(CoreId, u64)> {
        self.started.lock().clone()
    }

    /// Number of `stop` calls for `core`.
    pub fn stops(&self, core: CoreId) -> usize {
        self.stops.lock().iter().filter(|&&c| c == core).count()
    }
}

impl LocalTimer for MockLocalTimer {
    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn start(&self, core: CoreId, ticks: u64) {
        self.started.lock().push((core, ticks));
    }

    fn stop(&self, core: CoreId) {
        self.stops.lock().push(core);
    }
}

// ---------------------------------------------------------------------------
// Inter-core broadcast
// ---------------------------------------------------------------------------

/// Recording broadcast hardware.
#[derive(Debug, Clone, Default)]
pub struct MockBroadcast {
    busy: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<(CoreMask, u8)>>>,
}

impl MockBroadcast {
    /// Broadcasts delivered so far.
    pub fn sent(&self) -> Vec<(CoreMask, u8)> {
        self.sent.lock().clone()
    }

    /// Makes the hardware report busy.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl IpiBroadcast for MockBroadcast {
    fn busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn send(&self, targets: CoreMask, vector: u8) {
        self.sent.lock().push((targets, vector));
    }
}

// ---------------------------------------------------------------------------
// Register buses
// ---------------------------------------------------------------------------

/// Port I/O register file that records every write.
#[derive(Debug, Clone, Default)]
pub struct MockPorts {
    values: Arc<Mutex<BTreeMap<u16, u8>>>,
    writes: Arc<Mutex<Vec<(u16, u8)>>>,
}

impl MockPorts {
    /// Sets a register without recording a write.
    pub fn preset(&self, port: u16, value: u8) {
        self.values.lock().insert(port, value);
    }

    /// Current register value.
    pub fn value(&self, port: u16) -> u8 {
        self.values.lock().get(&port).copied().unwrap_or(0)
    }

    /// Writes so far.
    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.writes.lock().clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }
}

impl PortBus for MockPorts {
    fn read_u8(&self, port: u16) -> u8 {
        self.value(port)
    }

    fn write_u8(&self, port: u16, value: u8) {
        self.values.lock().insert(port, value);
        self.writes.lock().push((port, value));
    }
}

#[derive(Debug, Default)]
struct MmioState {
    values: BTreeMap<usize, u32>,
    /// Index register address to data register address.
    windows: BTreeMap<usize, usize>,
    /// (data register, index) to value.
    indexed: BTreeMap<(usize, u32), u32>,
    writes: Vec<(usize, u32)>,
}

impl MmioState {
    fn window_of(&self, data: usize) -> Option<u32> {
        self.windows
            .iter()
            .find(|(_, &d)| d == data)
            .map(|(select, _)| self.values.get(select).copied().unwrap_or(0))
    }
}

/// Memory-mapped register file that records every write.
///
/// Index/data register pairs can be attached so the registers behind the
/// data window behave like a separate register file.
#[derive(Debug, Clone, Default)]
pub struct MockMmio {
    state: Arc<Mutex<MmioState>>,
}

impl MockMmio {
    /// Sets a plain register without recording a write.
    pub fn preset(&self, addr: usize, value: u32) {
        self.state.lock().values.insert(addr, value);
    }

    /// Current plain register value.
    pub fn value(&self, addr: usize) -> u32 {
        self.state.lock().values.get(&addr).copied().unwrap_or(0)
    }

    /// Treats `data` as the window selected by the register at `select`.
    pub fn attach_window(&self, select: usize, data: usize) {
        self.state.lock().windows.insert(select, data);
    }

    /// Sets register `index` behind a window.
    pub fn preset_indexed(&self, select: usize, data: usize, index: u32, value: u32) {
        let mut state = self.state.lock();
        state.windows.insert(select, data);
        state.indexed.insert((data, index), value);
    }

    /// Register `index` behind a window.
    pub fn indexed(&self, _select: usize, data: usize, index: u32) -> u32 {
        self.state.lock().indexed.get(&(data, index)).copied().unwrap_or(0)
    }

    /// Writes so far.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state.lock().writes.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

impl MmioBus for MockMmio {
    fn read_u32(&self, addr: usize) -> u32 {
        let state = self.state.lock();
        match state.window_of(addr) {
            Some(index) => state.indexed.get(&(addr, index)).copied().unwrap_or(0),
            None => state.values.get(&addr).copied().unwrap_or(0),
        }
    }

    fn write_u32(&self, addr: usize, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((addr, value));
        match state.window_of(addr) {
            Some(index) => {
                state.indexed.insert((addr, index), value);
            }
            None => {
                state.values.insert(addr, value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Interrupt controllers
// ---------------------------------------------------------------------------

/// One interrupt-controller call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    /// Shared input configured.
    Configure(Route, u8, Polarity, Trigger, CoreId),
    /// Shared input masked.
    Mask(Route),
    /// Shared input unmasked.
    Unmask(Route),
    /// Shared input acknowledged.
    Acknowledge(Route),
    /// Local source configured.
    LocalConfigure(LocalSource, u8),
    /// Local source masked.
    LocalMask(LocalSource),
    /// Local source unmasked.
    LocalUnmask(LocalSource),
    /// Local end of interrupt.
    LocalEoi,
}

/// Recording shared controller with one redirection controller whose
/// entries match global line numbers.
#[derive(Debug, Clone, Default)]
pub struct MockController {
    ops: Arc<Mutex<Vec<CtlOp>>>,
    route_limit: Arc<Mutex<Option<u32>>>,
}

impl MockController {
    /// Calls so far.
    pub fn ops(&self) -> Vec<CtlOp> {
        self.ops.lock().clone()
    }

    /// Makes global lines at or above `limit` unroutable.
    pub fn set_route_limit(&self, limit: u32) {
        *self.route_limit.lock() = Some(limit);
    }
}

impl InterruptController for MockController {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn route(&self, global_line: u32) -> Option<Route> {
        let limit = self.route_limit.lock().unwrap_or(u32::from(u8::MAX));
        (global_line < limit).then_some(Route::Redirection {
            controller: 0,
            offset: global_line as u8,
        })
    }

    fn configure(
        &self,
        route: Route,
        vector: u8,
        polarity: Polarity,
        trigger: Trigger,
        target: CoreId,
    ) {
        self.ops
            .lock()
            .push(CtlOp::Configure(route, vector, polarity, trigger, target));
    }

    fn mask(&self, route: Route) {
        self.ops.lock().push(CtlOp::Mask(route));
    }

    fn unmask(&self, route: Route) {
        self.ops.lock().push(CtlOp::Unmask(route));
    }

    fn acknowledge(&self, route: Route) {
        self.ops.lock().push(CtlOp::Acknowledge(route));
    }
}

/// Recording local controller.
#[derive(Debug, Clone, Default)]
pub struct MockLocalController {
    ops: Arc<Mutex<Vec<CtlOp>>>,
}

impl MockLocalController {
    /// Calls so far.
    pub fn ops(&self) -> Vec<CtlOp> {
        self.ops.lock().clone()
    }
}

impl LocalInterruptController for MockLocalController {
    fn configure(&self, source: LocalSource, vector: u8) {
        self.ops.lock().push(CtlOp::LocalConfigure(source, vector));
    }

    fn mask(&self, source: LocalSource) {
        self.ops.lock().push(CtlOp::LocalMask(source));
    }

    fn unmask(&self, source: LocalSource) {
        self.ops.lock().push(CtlOp::LocalUnmask(source));
    }

    fn end_of_interrupt(&self) {
        self.ops.lock().push(CtlOp::LocalEoi);
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Device handler that counts its interrupts and optionally queues a
/// device event for the scheduler.
#[derive(Debug, Default)]
pub struct CountingHandler {
    count: AtomicUsize,
    queue_for: Option<IrqLine>,
}

impl CountingHandler {
    /// Handler that also queues [`EventKind::DeviceIrq`] for `line`.
    pub fn queueing(line: IrqLine) -> Self {
        Self {
            count: AtomicUsize::new(0),
            queue_for: Some(line),
        }
    }

    /// Interrupts serviced.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl DeviceIrqHandler for CountingHandler {
    fn on_irq(&self, core: &CpuCore) {
        self.count.fetch_add(1, Ordering::SeqCst);
        if let Some(line) = self.queue_for {
            core.queue_event(CpuCoreEvent::new(EventKind::DeviceIrq(line), core.id(), 0));
        }
    }
}

/// One observed system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallCall {
    /// Core it arrived on.
    pub core: CoreId,
    /// Calling thread.
    pub thread: ThreadId,
    /// Call id.
    pub id: u64,
    /// First argument.
    pub arg0: u64,
}

/// Syscall dispatcher that records calls and either answers immediately or
/// defers to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct RecordingSyscalls {
    calls: Arc<Mutex<Vec<SyscallCall>>>,
    defer: Arc<AtomicBool>,
}

impl RecordingSyscalls {
    /// Calls so far.
    pub fn calls(&self) -> Vec<SyscallCall> {
        self.calls.lock().clone()
    }

    /// When set, calls are left in flight for the scheduler to complete.
    pub fn set_defer(&self, defer: bool) {
        self.defer.store(defer, Ordering::SeqCst);
    }
}

impl SyscallDispatcher for RecordingSyscalls {
    fn on_system_call(&self, core: &CpuCore, thread: &ThreadRef, result: &mut u64) {
        let mut thread = thread.lock();
        self.calls.lock().push(SyscallCall {
            core: core.id(),
            thread: thread.id(),
            id: thread.syscall.id,
            arg0: thread.syscall.arg0,
        });
        if !self.defer.load(Ordering::SeqCst) {
            *result = thread.syscall.arg0 + 1;
            thread.syscall.in_flight = false;
        }
    }
}

/// One observed inter-core signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalCall {
    /// Receiving core.
    pub core: CoreId,
    /// Thread active on the receiving core.
    pub thread: Option<ThreadId>,
    /// Posting core.
    pub source: CoreId,
    /// Signal tag.
    pub kind: IciKind,
    /// Opaque argument.
    pub arg: usize,
}

/// Inter-core signal consumer that records what it receives and queues an
/// event for each.
#[derive(Debug, Clone, Default)]
pub struct RecordingSignals {
    received: Arc<Mutex<Vec<SignalCall>>>,
}

impl RecordingSignals {
    /// Signals so far.
    pub fn received(&self) -> Vec<SignalCall> {
        self.received.lock().clone()
    }
}

impl IciConsumer for RecordingSignals {
    fn on_inter_core_signal(
        &self,
        core: &CpuCore,
        thread: Option<&ThreadRef>,
        source: CoreId,
        kind: IciKind,
        arg: usize,
    ) {
        self.received.lock().push(SignalCall {
            core: core.id(),
            thread: thread.map(|t| t.lock().id()),
            source,
            kind,
            arg,
        });
        core.queue_event(CpuCoreEvent::new(
            EventKind::InterCoreSignal { source, kind },
            core.id(),
            0,
        ));
    }
}

/// Address-space manager with a settable per-core mapping.
#[derive(Debug, Clone, Default)]
pub struct FixedAddressSpace {
    mapped: Arc<Mutex<BTreeMap<u8, ProcessId>>>,
}

impl FixedAddressSpace {
    /// Records `process` as mapped on `core`.
    pub fn map(&self, core: CoreId, process: Option<ProcessId>) {
        let mut mapped = self.mapped.lock();
        match process {
            Some(process) => mapped.insert(core.0, process),
            None => mapped.remove(&core.0),
        };
    }
}

impl AddressSpace for FixedAddressSpace {
    fn mapped_process(&self, core: CoreId) -> Option<ProcessId> {
        self.mapped.lock().get(&core.0).copied()
    }
}

/// Kernel symbol table backed by a sorted address map.
#[derive(Debug, Clone, Default)]
pub struct MapSymbols {
    symbols: Arc<Mutex<BTreeMap<u64, &'static str>>>,
    lookups: Arc<AtomicUsize>,
}

impl MapSymbols {
    /// Adds a symbol starting at `addr`.
    pub fn insert(&self, addr: u64, name: &'static str) {
        self.symbols.lock().insert(addr, name);
    }

    /// Number of lookups made.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl SymbolLookup for MapSymbols {
    fn find_closest_symbol(&self, _process: Option<ProcessId>, addr: u64) -> Option<Symbol> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.symbols
            .lock()
            .range(..=addr)
            .next_back()
            .map(|(&start, &name)| Symbol {
                name,
                offset: addr - start,
            })
    }
}

// ---------------------------------------------------------------------------
// Engine rig
// ---------------------------------------------------------------------------

/// High-frequency counter rate of the rig.
pub const RIG_CLOCK_HZ: u64 = 10_000_000;
/// Per-core timer rate of the rig.
pub const RIG_LOCAL_HZ: u64 = 1_000_000;

/// Monitor stack top the rig assigns to `core`.
pub fn rig_monitor_stack(core: CoreId) -> usize {
    0x10_0000 * (core.index() + 1)
}

/// An engine wired to mocks, with handles to every mock.
pub struct EngineRig {
    /// Executing-core mock.
    pub cpu: Arc<MockCpu>,
    /// Counter.
    pub clock: MockClock,
    /// Scheduler timer.
    pub scheduler_timer: MockSchedulerTimer,
    /// Per-core timers.
    pub local_timer: MockLocalTimer,
    /// Broadcast hardware.
    pub broadcast: MockBroadcast,
    /// Shared controller.
    pub controller: MockController,
    /// Local controller.
    pub local: MockLocalController,
    /// Syscall dispatcher.
    pub syscalls: RecordingSyscalls,
    /// Signal consumer.
    pub signals: RecordingSignals,
    /// Address-space manager.
    pub address_space: FixedAddressSpace,
    /// Symbol table.
    pub symbols: MapSymbols,
    /// The engine under test.
    pub engine: InterruptEngine,
}

impl EngineRig {
    /// Engine with `cores` cores and the default vector layout.
    pub fn new(cores: usize) -> Self {
        let config = (0..cores).fold(EngineConfig::new(cores), |config, i| {
            let core = CoreId(i as u8);
            config.with_monitor_stack(core, rig_monitor_stack(core))
        });
        Self::with_config(config)
    }

    /// Engine with an explicit configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let cpu = Arc::new(MockCpu::new());
        let clock = MockClock::new(RIG_CLOCK_HZ);
        let scheduler_timer = MockSchedulerTimer::default();
        let local_timer = MockLocalTimer::new(RIG_LOCAL_HZ);
        let broadcast = MockBroadcast::default();
        let controller = MockController::default();
        let local = MockLocalController::default();
        let syscalls = RecordingSyscalls::default();
        let signals = RecordingSignals::default();
        let address_space = FixedAddressSpace::default();
        let symbols = MapSymbols::default();

        let platform = Platform {
            cpu: cpu.clone(),
            clock: Arc::new(clock.clone()),
            scheduler_timer: Box::new(scheduler_timer.clone()),
            local_timer: Box::new(local_timer.clone()),
            broadcast: Box::new(broadcast.clone()),
            shared: Box::new(controller.clone()),
            local: Arc::new(local.clone()),
        };
        let services = Services {
            syscalls: Box::new(syscalls.clone()),
            signals: Box::new(signals.clone()),
            address_space: Box::new(address_space.clone()),
            symbols: Box::new(symbols.clone()),
            monitor: test_monitor,
        };
        let engine = InterruptEngine::new(config, platform, services);
        engine.start();

        Self {
            cpu,
            clock,
            scheduler_timer,
            local_timer,
            broadcast,
            controller,
            local,
            syscalls,
            signals,
            address_space,
            symbols,
            engine,
        }
    }

    /// Makes `core` the executing core.
    pub fn on_core(&self, core: CoreId) -> &CpuCore {
        self.cpu.set_core(core);
        self.engine.core(core)
    }
}
