//! The interrupt engine.
//!
//! One [`InterruptEngine`] serves every core. It owns the core arena, the
//! timer service, the inter-core channel and the device routing table, and
//! exposes the driver-facing and scheduler-facing operations. The vector
//! path is in [`crate::dispatch`], monitor transitions in
//! [`crate::monitor`].

use alloc::boxed::Box;
use alloc::sync::Arc;

use kestrel_common::{CoreId, CoreMask, IciKind, IrqConfig, IrqError, IrqLine, TimerError};
use kestrel_hal::{
    ClockSource, CpuControl, InterruptController, IpiBroadcast, LocalInterruptController,
    LocalTimer, SchedulerTimer,
};
use log::info;

use crate::config::{EngineConfig, VectorLayout};
use crate::cpu::{CoreArena, CpuCore};
use crate::ici::IciChannel;
use crate::irq::{HandlerRef, IrqTable};
use crate::services::Services;
use crate::timer::TimerService;

/// Hardware selected at boot.
pub struct Platform {
    /// Executing-core control.
    pub cpu: Arc<dyn CpuControl>,
    /// High-frequency counter.
    pub clock: Arc<dyn ClockSource>,
    /// Global scheduler comparator.
    pub scheduler_timer: Box<dyn SchedulerTimer>,
    /// Per-core one-shot timers.
    pub local_timer: Box<dyn LocalTimer>,
    /// Inter-core interrupt hardware.
    pub broadcast: Box<dyn IpiBroadcast>,
    /// Shared controller family chosen by platform discovery.
    pub shared: Box<dyn InterruptController>,
    /// Per-core local controller.
    pub local: Arc<dyn LocalInterruptController>,
}

/// Interrupt dispatch, inter-core signalling and monitor entry for all
/// cores.
pub struct InterruptEngine {
    pub(crate) vectors: VectorLayout,
    pub(crate) cpu: Arc<dyn CpuControl>,
    pub(crate) cores: CoreArena,
    pub(crate) timers: TimerService,
    pub(crate) ici: IciChannel,
    pub(crate) irqs: IrqTable,
    pub(crate) services: Services,
}

impl InterruptEngine {
    /// Wires the engine to the platform and its collaborators.
    pub fn new(config: EngineConfig, platform: Platform, services: Services) -> Self {
        let cores = CoreArena::new(&config);
        let timers = TimerService::new(
            platform.cpu.clone(),
            platform.clock,
            platform.scheduler_timer,
            platform.local_timer,
        );
        let ici = IciChannel::new(platform.broadcast, config.vectors);
        let irqs = IrqTable::new(
            platform.cpu.clone(),
            platform.shared,
            platform.local,
            config.vectors,
            config.overrides,
        );
        Self {
            vectors: config.vectors,
            cpu: platform.cpu,
            cores,
            timers,
            ici,
            irqs,
            services,
        }
    }

    /// Starts kernel timing. Called once, before any core is launched.
    pub fn start(&self) {
        self.timers.start();
        info!(
            "engine: {} cores, counter {} Hz, core timer {} Hz",
            self.cores.len(),
            self.timers.frequency(),
            self.timers.core_frequency()
        );
    }

    /// Vector assignment.
    pub fn vectors(&self) -> &VectorLayout {
        &self.vectors
    }

    /// All cores.
    pub fn cores(&self) -> &CoreArena {
        &self.cores
    }

    /// Record of `id`.
    pub fn core(&self, id: CoreId) -> &CpuCore {
        self.cores.get(id)
    }

    /// Record of the executing core.
    pub fn current_core(&self) -> &CpuCore {
        self.cores.get(self.cpu.current_core())
    }

    /// Timer service.
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Device routing table.
    pub fn irqs(&self) -> &IrqTable {
        &self.irqs
    }

    /// High-frequency ticks since [`InterruptEngine::start`].
    pub fn ticks(&self) -> u64 {
        self.timers.ticks()
    }

    // -- driver interface ---------------------------------------------------

    /// Registers `handler` on `line`, leaving the line masked.
    pub fn install_handler(
        &self,
        line: IrqLine,
        handler: HandlerRef,
        config: IrqConfig,
    ) -> Result<(), IrqError> {
        self.irqs.install(line, handler, config)
    }

    /// Masks or unmasks a registered line.
    pub fn set_mask(&self, line: IrqLine, masked: bool) -> Result<(), IrqError> {
        self.irqs.set_mask(line, masked)
    }

    /// Masks `line` and removes `handler` from it.
    pub fn remove_handler(&self, line: IrqLine, handler: &HandlerRef) -> Result<(), IrqError> {
        self.irqs.remove(line, handler)
    }

    // -- scheduler interface ------------------------------------------------

    /// Re-arms the global scheduler timer from the executing core, or
    /// disarms it if `delta` is `None`.
    pub fn arm_scheduler_timer(&self, delta: Option<u64>) {
        self.timers.arm_scheduler_timer(self.cpu.current_core(), delta);
    }

    /// Arms the executing core's one-shot timer.
    pub fn set_core_timer(&self, ticks: u64) -> Result<(), TimerError> {
        self.timers.set_core_timer(self.current_core(), ticks)
    }

    /// Stops the executing core's one-shot timer.
    pub fn stop_core_timer(&self) {
        self.timers.stop_core_timer(self.current_core());
    }

    /// Posts a signal from the executing core to `targets`. Returns the
    /// cores that got a fresh signal.
    pub fn send_inter_core_signal(&self, targets: CoreMask, kind: IciKind, arg: usize) -> CoreMask {
        self.ici
            .send(&self.cores, self.cpu.current_core(), targets, kind, arg)
    }
}
