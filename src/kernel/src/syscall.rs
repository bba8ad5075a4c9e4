//! System-call gate.
//!
//! The call id arrives in `rax` and the first argument in `rdi`. The
//! dispatcher writes its answer straight into the saved `rax`, which the
//! thread sees if it returns from this interrupt without a reschedule.
//! A call the dispatcher leaves in flight is queued to the scheduler as a
//! [`EventKind::SystemCall`] event, so the thread does not return before it
//! completes.

use kestrel_common::InterruptFrame;
use log::trace;

use crate::cpu::CpuCore;
use crate::engine::InterruptEngine;
use crate::event::{CpuCoreEvent, EventKind};

impl InterruptEngine {
    pub(crate) fn system_call(&self, core: &CpuCore, frame: &mut InterruptFrame) {
        if !frame.is_user() {
            self.fatal(core, frame, format_args!("system call trap from kernel mode"));
        }
        let Some(thread) = core.active_thread() else {
            self.fatal(core, frame, format_args!("system call with no active thread"));
        };

        frame.enable_interrupts();
        {
            // Nothing on this core holds a lock while it runs user code.
            let mut thread = thread.lock();
            thread.syscall.id = frame.regs.rax;
            thread.syscall.arg0 = frame.regs.rdi;
            thread.syscall.in_flight = true;
            trace!("syscall: {} id {} on {}", thread.id(), frame.regs.rax, core.id());
        }

        self.services
            .syscalls
            .on_system_call(core, &thread, &mut frame.regs.rax);

        // A call still in flight completes in the scheduler. Until then the
        // value the dispatcher left behind is the result on resume.
        let deferred = {
            let mut thread = thread.lock();
            if thread.syscall.in_flight {
                thread.syscall.result = frame.regs.rax;
            }
            thread.syscall.in_flight.then(|| thread.id())
        };
        if let Some(id) = deferred {
            trace!("syscall: {} deferred to the scheduler", id);
            core.queue_event(CpuCoreEvent::new(
                EventKind::SystemCall(id),
                core.id(),
                self.timers.ticks(),
            ));
        }
    }
}
