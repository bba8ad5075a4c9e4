//! Events handed from interrupt context to the scheduler.

use kestrel_common::{CoreId, IciKind, IrqLine, ThreadId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The active thread faulted in user mode; details are in its
    /// last-exception record.
    ThreadException(ThreadId),
    /// The global scheduler timer fired while armed.
    SchedulerTimerFired,
    /// A system call needs the scheduler to complete.
    SystemCall(ThreadId),
    /// An inter-core signal arrived from `source`.
    InterCoreSignal {
        /// Posting core.
        source: CoreId,
        /// Signal tag.
        kind: IciKind,
    },
    /// A device line fired.
    DeviceIrq(IrqLine),
}

/// One record in a core's pending-event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCoreEvent {
    /// What happened.
    pub kind: EventKind,
    /// Core that produced the event.
    pub core: CoreId,
    /// High-frequency tick at which it was produced.
    pub timestamp: u64,
}

impl CpuCoreEvent {
    /// Creates an event record.
    pub const fn new(kind: EventKind, core: CoreId, timestamp: u64) -> Self {
        Self {
            kind,
            core,
            timestamp,
        }
    }
}
