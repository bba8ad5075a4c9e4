//! Monitor entry and thread resume.
//!
//! A core is in one of three states: running a thread, idle, or in its
//! monitor. The monitor runs on a fixed per-core stack and is entered by a
//! transfer that never returns to the interrupted frame; it leaves only by
//! resuming a thread ([`InterruptEngine::resume_thread`]) or parking the
//! core ([`InterruptEngine::idle`]).

use alloc::boxed::Box;
use core::mem;
use core::sync::atomic::Ordering;

use kestrel_common::{CoreId, InterruptFrame, ThreadId};
use kestrel_hal::ResumeContext;
use log::{debug, trace, warn};

use crate::cpu::CpuCore;
use crate::engine::InterruptEngine;
use crate::thread::{FramePtr, SavedContext, ThreadRef};

/// Converts a quantum in global ticks to core-local ticks, rounding down.
pub fn rescale_quantum(quantum: u64, core_rate: u64, global_rate: u64) -> u64 {
    let scaled = u128::from(quantum) * u128::from(core_rate) / u128::from(global_rate.max(1));
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

impl InterruptEngine {
    /// Enters the monitor if it was forced or events are pending, unless the
    /// core is already in its monitor and not parked.
    ///
    /// Entry is postponed while a kernel thread's own lock is held; the
    /// events stay queued and the next interrupt retries.
    pub(crate) fn enter_monitor_if_needed(
        &self,
        core: &CpuCore,
        frame: &mut InterruptFrame,
        force: bool,
    ) {
        if !force && core.pending_event_count() == 0 {
            return;
        }
        if core.is_in_monitor() && !core.is_idle() {
            return;
        }
        if !Self::save_active_context(core, frame) {
            trace!(
                "monitor: {} entry postponed, active thread lock is held",
                core.id()
            );
            return;
        }
        self.enter_monitor(core)
    }

    /// Stores the interrupted context in the active thread. Returns `false`
    /// if the thread's lock could not be taken without spinning.
    fn save_active_context(core: &CpuCore, frame: &mut InterruptFrame) -> bool {
        let Some(thread) = core.active_thread() else {
            return true;
        };
        let mut thread = if frame.is_user() {
            // Nothing on this core holds a lock while it runs user code.
            thread.lock()
        } else {
            match thread.try_lock() {
                Some(guard) => guard,
                None => return false,
            }
        };
        let saved = if thread.is_user() {
            SavedContext::User(Box::new(*frame))
        } else {
            SavedContext::KernelFrame(FramePtr::new(frame))
        };
        thread.saved = saved;
        true
    }

    fn enter_monitor(&self, core: &CpuCore) -> ! {
        self.timers.stop_core_timer(core);
        core.idle.store(false, Ordering::Release);
        core.in_monitor.store(true, Ordering::Release);
        core.handling_interrupt.store(false, Ordering::Release);
        debug!(
            "monitor: {} entering, {} events pending",
            core.id(),
            core.pending_event_count()
        );
        self.cpu
            .enter_monitor(core.id(), core.monitor_stack(), self.services.monitor)
    }

    /// First transfer of `id` onto its monitor stack at boot.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not the executing core.
    pub fn launch(&self, id: CoreId) -> ! {
        assert_eq!(self.cpu.current_core(), id, "{} launched from another core", id);
        let core = self.core(id);
        core.in_monitor.store(true, Ordering::Release);
        debug!("monitor: launching {}", id);
        self.cpu
            .enter_monitor(id, core.monitor_stack(), self.services.monitor)
    }

    /// Parks the executing core until an interrupt needs the monitor again.
    ///
    /// # Panics
    ///
    /// Panics if called outside the monitor.
    pub fn idle(&self) -> ! {
        let core = self.current_core();
        assert!(core.is_in_monitor(), "{} idled outside its monitor", core.id());
        drop(core.take_active_thread());
        core.idle.store(true, Ordering::Release);
        debug!("monitor: {} idle", core.id());
        self.cpu.wait_for_interrupt()
    }

    /// Makes `thread` the executing core's active thread and returns into
    /// its saved context.
    ///
    /// Must be called from the monitor with local interrupts disabled.
    ///
    /// # Panics
    ///
    /// Panics if the core is mid-interrupt, interrupts are enabled, the
    /// thread has no saved context, a user thread's process is not the one
    /// mapped on the core, or the saved selectors and flags do not describe
    /// the thread's privilege level with interrupts enabled.
    pub fn resume_thread(&self, thread: ThreadRef) -> ! {
        let core = self.current_core();
        assert!(
            !core.is_handling_interrupt(),
            "{} resumed a thread while handling an interrupt",
            core.id()
        );
        assert!(
            !self.cpu.interrupts_enabled(),
            "{} resumed a thread with interrupts enabled",
            core.id()
        );

        let (context, quantum) = {
            let mut t = thread.lock();
            let id = t.id();
            let user = t.is_user();
            if let Some(process) = t.process() {
                let mapped = self.services.address_space.mapped_process(core.id());
                assert_eq!(
                    mapped,
                    Some(process),
                    "{} resumed with the wrong address space on {}",
                    id,
                    core.id()
                );
            }

            let pending_result = t.syscall.in_flight.then_some(t.syscall.result);
            t.syscall.in_flight = false;

            let context = match mem::take(&mut t.saved) {
                SavedContext::User(mut frame) => {
                    Self::prepare_frame(&mut frame, user, pending_result, id);
                    ResumeContext::Copied(*frame)
                }
                SavedContext::KernelFrame(ptr) => {
                    // SAFETY: the thread is not running and its stack still
                    // holds the frame captured at monitor entry.
                    let frame = unsafe { ptr.get_mut() };
                    Self::prepare_frame(frame, user, pending_result, id);
                    ResumeContext::InPlace(ptr.as_non_null())
                }
                SavedContext::None => panic!("{} has no saved context", id),
            };
            (context, t.quantum_ticks)
        };

        let core_ticks = rescale_quantum(
            quantum,
            self.timers.core_frequency(),
            self.timers.frequency(),
        );
        if core_ticks > 0 {
            if let Err(err) = self.timers.set_core_timer(core, core_ticks) {
                warn!("monitor: {} quantum timer not armed: {}", core.id(), err);
            }
        }

        core.set_active(Some(thread));
        core.idle.store(false, Ordering::Release);
        core.in_monitor.store(false, Ordering::Release);
        debug!("monitor: {} resuming, quantum {} core ticks", core.id(), core_ticks);
        self.cpu.resume(core.id(), context)
    }

    fn prepare_frame(
        frame: &mut InterruptFrame,
        user: bool,
        pending_result: Option<u64>,
        id: ThreadId,
    ) {
        assert!(
            frame.selectors_match(user),
            "{} saved selectors {:#x}/{:#x} do not match its mode",
            id,
            frame.cs,
            frame.ss
        );
        assert!(
            frame.interrupts_enabled(),
            "{} saved context has interrupts disabled",
            id
        );
        if let Some(result) = pending_result {
            frame.regs.rax = result;
        }
    }
}
