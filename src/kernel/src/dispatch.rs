//! Vector dispatch.
//!
//! Every interrupt, exception and trap on every core enters here through
//! the architecture's entry stubs with the saved frame of the interrupted
//! context. The handler either returns (the stub restores the frame) or
//! makes a non-returning transfer into the monitor.

use core::sync::atomic::Ordering;

use kestrel_common::{CoreId, IciKind, InterruptFrame, IrqLine};
use log::{error, trace};

use crate::config::VectorClass;
use crate::cpu::CpuCore;
use crate::engine::InterruptEngine;

impl InterruptEngine {
    /// Handles one vector on the executing core.
    ///
    /// # Panics
    ///
    /// Panics if the core is already handling an interrupt.
    pub fn handle_interrupt(&self, frame: &mut InterruptFrame) {
        let core = self.current_core();
        if core.handling_interrupt.swap(true, Ordering::AcqRel) {
            self.fatal(
                core,
                frame,
                format_args!("re-entrant interrupt, vector {:#x}", frame.vector),
            );
        }

        let vector = frame.vector as u8;
        let mut force_monitor = false;
        match self.vectors.classify(vector) {
            VectorClass::Exception(_) => self.classify_exception(core, frame),
            VectorClass::SystemCall => self.system_call(core, frame),
            VectorClass::InterCore(source) => {
                self.inter_core_signal(core, source);
                self.irqs.end_of_interrupt(vector);
            }
            VectorClass::Device(line) => {
                force_monitor = self.device_irq(core, line);
                self.irqs.end_of_interrupt(vector);
            }
            VectorClass::Unrouted => {
                trace!("dispatch: {} unrouted vector {:#x}", core.id(), vector);
                self.irqs.end_of_interrupt(vector);
            }
            VectorClass::Spurious => trace!("dispatch: {} spurious", core.id()),
        }

        self.enter_monitor_if_needed(core, frame, force_monitor);
        core.handling_interrupt.store(false, Ordering::Release);
    }

    /// Services a device line. Returns `true` if the monitor must run.
    fn device_irq(&self, core: &CpuCore, line: IrqLine) -> bool {
        trace!("dispatch: {} {}", core.id(), line);
        if line == IrqLine::SCHEDULER_TIMER {
            self.timers.scheduler_timer_fired(core);
            return true;
        }
        if line == IrqLine::LOCAL_TIMER {
            return self.timers.core_timer_fired(core);
        }
        match self.irqs.handler(line) {
            Some(handler) => handler.on_irq(core),
            None => trace!("dispatch: no handler on {}", line),
        }
        false
    }

    fn inter_core_signal(&self, core: &CpuCore, source: CoreId) {
        let Some((kind, arg)) = self.ici.receive(core, source) else {
            trace!("dispatch: {} empty mailbox from {}", core.id(), source);
            return;
        };
        if kind == IciKind::HALT {
            error!("{} halted by {}", core.id(), source);
            self.cpu.halt();
        }
        let thread = core.active_thread();
        self.services
            .signals
            .on_inter_core_signal(core, thread.as_ref(), source, kind, arg);
    }
}
