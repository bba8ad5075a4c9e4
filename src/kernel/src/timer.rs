//! Monotonic timer service.
//!
//! Three facilities share this module:
//! - the free-running high-frequency counter, biased so that it reads near
//!   zero when kernel timing starts;
//! - the single global scheduler timer, a comparator on that counter;
//! - one independently armed one-shot timer per core.
//!
//! Every fire is checked against a software "armed" flag first. A fire that
//! raced with a disarm is absorbed without producing an event.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use kestrel_common::{CoreId, TimerError};
use kestrel_hal::{ClockSource, CpuControl, LocalTimer, SchedulerTimer};
use log::{debug, trace, warn};

use crate::cpu::CpuCore;
use crate::event::{CpuCoreEvent, EventKind};
use crate::sync::IrqSpinlock;

/// The scheduler timer never fires more often than this.
pub const SCHEDULER_TIMER_MAX_HZ: u64 = 500;

#[derive(Debug, Default)]
struct SchedulerTimerState {
    armed: bool,
    compare: u64,
}

/// Counter, scheduler timer and per-core timers.
pub struct TimerService {
    clock: Arc<dyn ClockSource>,
    scheduler: Box<dyn SchedulerTimer>,
    local: Box<dyn LocalTimer>,
    bias: AtomicU64,
    state: IrqSpinlock<SchedulerTimerState>,
}

impl TimerService {
    /// Wraps the timer hardware. The counter is unbiased until
    /// [`TimerService::start`].
    pub fn new(
        cpu: Arc<dyn CpuControl>,
        clock: Arc<dyn ClockSource>,
        scheduler: Box<dyn SchedulerTimer>,
        local: Box<dyn LocalTimer>,
    ) -> Self {
        Self {
            clock,
            scheduler,
            local,
            bias: AtomicU64::new(0),
            state: IrqSpinlock::new(cpu, SchedulerTimerState::default()),
        }
    }

    /// Captures the counter bias and leaves the scheduler timer disabled.
    pub fn start(&self) {
        self.bias.store(self.clock.counter(), Ordering::Release);
        let mut state = self.state.lock();
        self.scheduler.disable();
        state.armed = false;
        debug!("timer: started, {} Hz", self.clock.frequency());
    }

    /// High-frequency ticks since [`TimerService::start`].
    pub fn ticks(&self) -> u64 {
        self.clock
            .counter()
            .wrapping_sub(self.bias.load(Ordering::Acquire))
    }

    /// Counter frequency in Hz.
    pub fn frequency(&self) -> u64 {
        self.clock.frequency()
    }

    /// Per-core timer frequency in Hz.
    pub fn core_frequency(&self) -> u64 {
        self.local.frequency()
    }

    /// Converts high-frequency ticks to whole milliseconds.
    pub fn ticks_to_ms(&self, ticks: u64) -> u64 {
        let freq = u128::from(self.frequency().max(1));
        (u128::from(ticks) * 1000 / freq) as u64
    }

    /// Smallest delta the scheduler timer is ever programmed with.
    pub fn min_delta(&self) -> u64 {
        (self.frequency() / SCHEDULER_TIMER_MAX_HZ).max(1)
    }

    /// Disarms the scheduler timer and, if `delta` is given, re-arms it to
    /// fire `max(delta, min_delta)` ticks from now.
    pub fn arm_scheduler_timer(&self, core: CoreId, delta: Option<u64>) {
        let mut state = self.state.lock();
        self.scheduler.disable();
        state.armed = false;

        let Some(delta) = delta else {
            trace!("timer: {} disarmed scheduler timer", core);
            return;
        };
        let delta = delta.max(self.min_delta());
        let compare = self.clock.counter().wrapping_add(delta);
        self.scheduler.set_compare(compare);
        state.armed = true;
        state.compare = compare;
        self.scheduler.enable();
        trace!("timer: {} armed scheduler timer, +{} ticks", core, delta);
    }

    /// Returns `true` while the scheduler timer is armed.
    pub fn scheduler_timer_armed(&self) -> bool {
        self.scheduler_timer_deadline().is_some()
    }

    /// Raw counter value the armed scheduler timer fires at.
    pub fn scheduler_timer_deadline(&self) -> Option<u64> {
        let state = self.state.lock();
        state.armed.then_some(state.compare)
    }

    /// Handles a scheduler-timer interrupt on `core`.
    ///
    /// Queues a [`EventKind::SchedulerTimerFired`] event and returns `true`
    /// if the timer was armed; a late fire after a disarm returns `false`.
    pub fn scheduler_timer_fired(&self, core: &CpuCore) -> bool {
        {
            let mut state = self.state.lock();
            if !state.armed {
                trace!("timer: stale scheduler timer fire on {}", core.id());
                return false;
            }
            state.armed = false;
            self.scheduler.disable();
        }
        core.queue_event(CpuCoreEvent::new(
            EventKind::SchedulerTimerFired,
            core.id(),
            self.ticks(),
        ));
        true
    }

    /// Arms `core`'s one-shot timer for `ticks` core-local ticks.
    ///
    /// Fails if the timer is already armed; the running countdown is left
    /// untouched.
    pub fn set_core_timer(&self, core: &CpuCore, ticks: u64) -> Result<(), TimerError> {
        if ticks == 0 {
            return Err(TimerError::ZeroDelay);
        }
        if core
            .local_timer_armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("timer: {} core timer armed twice", core.id());
            return Err(TimerError::AlreadyArmed);
        }
        self.local.start(core.id(), ticks);
        Ok(())
    }

    /// Masks `core`'s timer and clears its armed flag, whatever its state.
    pub fn stop_core_timer(&self, core: &CpuCore) {
        self.local.stop(core.id());
        core.local_timer_armed.store(false, Ordering::Release);
    }

    /// Handles a per-core timer interrupt. Returns `true` if the fire was
    /// meaningful and the monitor must be entered.
    pub fn core_timer_fired(&self, core: &CpuCore) -> bool {
        if !core.local_timer_armed.swap(false, Ordering::AcqRel) {
            trace!("timer: stale core timer fire on {}", core.id());
            return false;
        }
        self.local.stop(core.id());
        true
    }
}
