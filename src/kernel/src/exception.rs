//! Processor exception classification.
//!
//! User faults become scheduler events and leave the frame untouched.
//! Kernel faults are caught by the innermost mounted trap of the active
//! thread, or are fatal.

use kestrel_common::{ExceptionKind, FaultFlags, InterruptFrame};
use log::{debug, trace, warn};

use crate::cpu::CpuCore;
use crate::engine::InterruptEngine;
use crate::event::{CpuCoreEvent, EventKind};
use crate::thread::{LastException, ThreadRef, TrapSlot};

/// Value left in the result register of a thread resumed at a trap's mount
/// site.
pub const TRAP_FIRED: u64 = 1;

impl InterruptEngine {
    pub(crate) fn classify_exception(&self, core: &CpuCore, frame: &mut InterruptFrame) {
        let kind = ExceptionKind::from_vector(frame.vector as u8);
        if frame.is_user() {
            self.user_fault(core, frame, kind);
            return;
        }
        if !core.is_in_monitor() && self.catch_in_trap(core, frame, kind) {
            return;
        }
        self.fatal(
            core,
            frame,
            format_args!("unhandled kernel {} exception, vector {}", kind, frame.vector),
        );
    }

    fn user_fault(&self, core: &CpuCore, frame: &InterruptFrame, kind: ExceptionKind) {
        let Some(thread) = core.active_thread() else {
            self.fatal(core, frame, format_args!("user {} fault with no active thread", kind));
        };
        let flags = FaultFlags::from_bits_retain(frame.error_code);
        let access = kind == ExceptionKind::Access;
        let timestamp = self.timers.ticks();
        let record = LastException {
            kind,
            fault_addr: if access { self.cpu.fault_address() } else { frame.ip },
            page_was_present: access && flags.contains(FaultFlags::PRESENT),
            was_write: access && flags.contains(FaultFlags::WRITE),
            timestamp,
        };

        let id = {
            // Nothing on this core holds a lock while it runs user code.
            let mut thread = thread.lock();
            thread.last_exception = Some(record);
            thread.id()
        };
        debug!(
            "exception: {} {} at {:#x} on {}",
            id,
            kind,
            record.fault_addr,
            core.id()
        );
        core.queue_event(CpuCoreEvent::new(
            EventKind::ThreadException(id),
            core.id(),
            timestamp,
        ));
    }

    /// Redirects the frame to the innermost mounted trap. Returns `false` if
    /// there is none.
    fn catch_in_trap(
        &self,
        core: &CpuCore,
        frame: &mut InterruptFrame,
        kind: ExceptionKind,
    ) -> bool {
        let Some(thread) = core.active_thread() else {
            return false;
        };
        // The faulting code may be the thread itself holding its lock.
        let Some(mut guard) = thread.try_lock() else {
            warn!("exception: {} thread lock held at fault on {}", kind, core.id());
            return false;
        };
        let Some(trap) = guard.pop_trap() else {
            return false;
        };
        drop(guard);
        *frame = trap.context;
        frame.regs.rax = TRAP_FIRED;
        trap.slot.fire(kind);
        trace!("exception: {} caught by trap on {}", kind, core.id());
        true
    }

    /// Mounts a trap on `thread` that resumes at `context` with
    /// [`TRAP_FIRED`] in the result register if a kernel exception hits
    /// before [`InterruptEngine::dismount_trap`].
    ///
    /// Local interrupts are disabled while the trap stack is edited, so an
    /// interrupt on this core never finds the thread lock held by the push.
    pub fn mount_trap(&self, thread: &ThreadRef, context: InterruptFrame) -> TrapSlot {
        let was_enabled = self.cpu.disable_interrupts();
        let slot = thread.lock().mount_trap(context);
        self.cpu.restore_interrupts(was_enabled);
        slot
    }

    /// Pops the innermost trap of `thread` on normal fall-through.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not the innermost mounted trap.
    pub fn dismount_trap(&self, thread: &ThreadRef, slot: &TrapSlot) {
        let was_enabled = self.cpu.disable_interrupts();
        thread.lock().dismount_trap(slot);
        self.cpu.restore_interrupts(was_enabled);
    }
}

#[cfg(test)]
mod tests {
    use kestrel_common::{CoreId, ProcessId, ThreadId};
    use kestrel_hal::CpuControl;

    use crate::testutil::{diverge, EngineRig, MonitorEntered};
    use crate::thread::Thread;

    use super::*;

    #[test]
    fn test_non_access_user_fault_records_ip() {
        let rig = EngineRig::new(1);
        let thread = Thread::user(ThreadId(3), ProcessId(1)).into_ref();
        rig.engine.core(CoreId(0)).set_active(Some(thread.clone()));
        rig.cpu.set_fault_address(0xBAD);

        let mut frame = InterruptFrame::user(0x40_1000, 0x7FFF_0000);
        frame.vector = 13;
        frame.error_code = 0b11;
        let entered: MonitorEntered = diverge(|| rig.engine.handle_interrupt(&mut frame));
        assert_eq!(entered.core, CoreId(0));

        let record = thread.lock().last_exception.unwrap();
        assert_eq!(record.kind, ExceptionKind::Privilege);
        assert_eq!(record.fault_addr, 0x40_1000);
        assert!(!record.was_write);
    }

    #[test]
    fn test_nested_traps_unwind_innermost_first() {
        let rig = EngineRig::new(1);
        let thread = Thread::kernel(ThreadId(4)).into_ref();
        let outer = rig.engine.mount_trap(&thread, InterruptFrame::kernel(0x100, 0x9000));
        let inner = rig.engine.mount_trap(&thread, InterruptFrame::kernel(0x200, 0x8800));
        rig.engine.core(CoreId(0)).set_active(Some(thread.clone()));

        let mut frame = InterruptFrame::kernel(0x5555, 0x8000);
        frame.vector = 12;
        rig.engine.handle_interrupt(&mut frame);

        assert_eq!(frame.ip, 0x200);
        assert_eq!(frame.regs.rax, TRAP_FIRED);
        assert_eq!(inner.result(), Some(ExceptionKind::Stack));
        assert_eq!(outer.result(), None);
        assert_eq!(thread.lock().trap_depth(), 1);
    }

    #[test]
    #[should_panic(expected = "unhandled kernel")]
    fn test_kernel_fault_without_trap_is_fatal() {
        let rig = EngineRig::new(1);
        rig.engine
            .core(CoreId(0))
            .set_active(Some(Thread::kernel(ThreadId(5)).into_ref()));
        let mut frame = InterruptFrame::kernel(0x5555, 0x8000);
        frame.vector = 14;
        rig.engine.handle_interrupt(&mut frame);
    }

    #[test]
    #[should_panic(expected = "unhandled kernel")]
    fn test_fault_in_monitor_ignores_traps() {
        let rig = EngineRig::new(1);
        let thread = Thread::kernel(ThreadId(6)).into_ref();
        let _slot = rig.engine.mount_trap(&thread, InterruptFrame::kernel(0x100, 0x9000));
        let core = rig.engine.core(CoreId(0));
        core.set_active(Some(thread));
        core.in_monitor.store(true, core::sync::atomic::Ordering::SeqCst);

        let mut frame = InterruptFrame::kernel(0x5555, 0x8000);
        frame.vector = 0;
        rig.engine.handle_interrupt(&mut frame);
    }

    #[test]
    fn test_mount_masks_interrupts_and_restores() {
        let rig = EngineRig::new(1);
        rig.cpu.set_interrupts(true);
        let thread = Thread::kernel(ThreadId(7)).into_ref();

        let slot = rig.engine.mount_trap(&thread, InterruptFrame::kernel(0x100, 0x9000));
        assert_eq!(rig.cpu.disable_count(), 1);
        assert!(rig.cpu.interrupts_enabled());
        assert_eq!(thread.lock().trap_depth(), 1);

        rig.engine.dismount_trap(&thread, &slot);
        assert_eq!(rig.cpu.disable_count(), 2);
        assert!(rig.cpu.interrupts_enabled());
        assert_eq!(thread.lock().trap_depth(), 0);
        assert_eq!(slot.result(), None);
    }

    #[test]
    fn test_dismounted_trap_no_longer_catches() {
        let rig = EngineRig::new(1);
        let thread = Thread::kernel(ThreadId(8)).into_ref();
        let slot = rig.engine.mount_trap(&thread, InterruptFrame::kernel(0x100, 0x9000));
        rig.engine.dismount_trap(&thread, &slot);
        rig.engine.core(CoreId(0)).set_active(Some(thread));

        let mut frame = InterruptFrame::kernel(0x5555, 0x8000);
        frame.vector = 0;
        let caught = std::panic::catch_unwind(core::panic::AssertUnwindSafe(|| {
            rig.engine.handle_interrupt(&mut frame)
        }));
        assert!(caught.is_err());
        assert_eq!(slot.result(), None);
    }

    #[test]
    #[should_panic(expected = "unhandled kernel")]
    fn test_fault_with_thread_lock_held_is_fatal() {
        let rig = EngineRig::new(1);
        let thread = Thread::kernel(ThreadId(9)).into_ref();
        let _slot = rig.engine.mount_trap(&thread, InterruptFrame::kernel(0x100, 0x9000));
        rig.engine.core(CoreId(0)).set_active(Some(thread.clone()));

        let _held = thread.lock();
        let mut frame = InterruptFrame::kernel(0x5555, 0x8000);
        frame.vector = 0;
        rig.engine.handle_interrupt(&mut frame);
    }
}
