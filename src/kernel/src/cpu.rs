//! Per-core records.
//!
//! One [`CpuCore`] exists per physical core for the lifetime of the kernel.
//! Every field is written only by its own core, with one exception: the
//! inter-core mailboxes, which other cores reach through the
//! [`RemoteCore`] handle and nothing else.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use kestrel_common::{CoreId, IciKind, ThreadId, MAX_CORES};
use spin::Mutex;

use crate::config::EngineConfig;
use crate::event::CpuCoreEvent;
use crate::thread::ThreadRef;

const NO_THREAD: u32 = u32::MAX;
const EMPTY_SLOT: u32 = 0;

/// One (destination, source) inter-core mailbox.
///
/// Holds at most one signal. Only the source core fills it, and only while
/// it is empty; only the destination core empties it.
#[derive(Debug)]
pub struct Mailbox {
    kind: AtomicU32,
    arg: AtomicUsize,
}

impl Mailbox {
    const fn new() -> Self {
        Self {
            kind: AtomicU32::new(EMPTY_SLOT),
            arg: AtomicUsize::new(0),
        }
    }

    fn post(&self, kind: IciKind, arg: usize) -> bool {
        if self.kind.load(Ordering::Acquire) != EMPTY_SLOT {
            return false;
        }
        self.arg.store(arg, Ordering::Relaxed);
        // Release orders the argument before the tag.
        self.kind.store(kind.raw(), Ordering::Release);
        true
    }

    fn take(&self) -> Option<(IciKind, usize)> {
        let kind = IciKind::decode(self.kind.load(Ordering::Acquire))?;
        let arg = self.arg.load(Ordering::Relaxed);
        self.kind.store(EMPTY_SLOT, Ordering::Release);
        fence(Ordering::Acquire);
        Some((kind, arg))
    }

    fn peek(&self) -> Option<(IciKind, usize)> {
        let kind = IciKind::decode(self.kind.load(Ordering::Acquire))?;
        Some((kind, self.arg.load(Ordering::Relaxed)))
    }
}

/// State of one physical core.
#[derive(Debug)]
pub struct CpuCore {
    id: CoreId,
    monitor_stack: usize,
    active: Mutex<Option<ThreadRef>>,
    active_id: AtomicU32,
    pending: SegQueue<CpuCoreEvent>,
    pub(crate) handling_interrupt: AtomicBool,
    pub(crate) in_monitor: AtomicBool,
    pub(crate) idle: AtomicBool,
    pub(crate) local_timer_armed: AtomicBool,
    mailboxes: [Mailbox; MAX_CORES],
}

impl CpuCore {
    fn new(id: CoreId, monitor_stack: usize) -> Self {
        Self {
            id,
            monitor_stack,
            active: Mutex::new(None),
            active_id: AtomicU32::new(NO_THREAD),
            pending: SegQueue::new(),
            handling_interrupt: AtomicBool::new(false),
            in_monitor: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            local_timer_armed: AtomicBool::new(false),
            mailboxes: core::array::from_fn(|_| Mailbox::new()),
        }
    }

    /// Core index.
    pub fn id(&self) -> CoreId {
        self.id
    }

    /// Top of this core's monitor stack.
    pub fn monitor_stack(&self) -> usize {
        self.monitor_stack
    }

    /// The thread currently active on this core, if any.
    pub fn active_thread(&self) -> Option<ThreadRef> {
        self.active.lock().clone()
    }

    /// Identity of the active thread without taking its lock.
    pub fn active_thread_id(&self) -> Option<ThreadId> {
        match self.active_id.load(Ordering::Acquire) {
            NO_THREAD => None,
            id => Some(ThreadId(id)),
        }
    }

    /// Publishes `thread` as this core's active thread.
    pub(crate) fn set_active(&self, thread: Option<ThreadRef>) {
        let id = thread
            .as_ref()
            .map_or(NO_THREAD, |t| t.lock().id().0);
        *self.active.lock() = thread;
        self.active_id.store(id, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Drops the active-thread reference and hands it back to the caller.
    pub fn take_active_thread(&self) -> Option<ThreadRef> {
        let thread = self.active.lock().take();
        self.active_id.store(NO_THREAD, Ordering::Release);
        thread
    }

    /// Appends an event to the pending list. Never blocks or fails.
    pub fn queue_event(&self, event: CpuCoreEvent) {
        self.pending.push(event);
    }

    /// Number of events waiting for the scheduler.
    pub fn pending_event_count(&self) -> usize {
        self.pending.len()
    }

    /// Removes the oldest pending event.
    pub fn take_event(&self) -> Option<CpuCoreEvent> {
        self.pending.pop()
    }

    /// Returns `true` while the core runs its monitor.
    pub fn is_in_monitor(&self) -> bool {
        self.in_monitor.load(Ordering::Acquire)
    }

    /// Returns `true` while the monitor has parked the core.
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Returns `true` between vector entry and exit.
    pub fn is_handling_interrupt(&self) -> bool {
        self.handling_interrupt.load(Ordering::Acquire)
    }

    /// Returns `true` while the core's local timer is armed.
    pub fn is_local_timer_armed(&self) -> bool {
        self.local_timer_armed.load(Ordering::Acquire)
    }

    /// Empties the mailbox `source` writes to, returning its signal.
    pub(crate) fn take_signal(&self, source: CoreId) -> Option<(IciKind, usize)> {
        self.mailboxes.get(source.index())?.take()
    }

    /// Reads the mailbox `source` writes to without emptying it.
    pub fn peek_signal(&self, source: CoreId) -> Option<(IciKind, usize)> {
        self.mailboxes.get(source.index())?.peek()
    }
}

/// The only view of a core that another core may hold.
///
/// It can post into the mailbox reserved for a given source and read the
/// published active-thread identity. Nothing else about the core is
/// reachable through it.
#[derive(Debug, Clone, Copy)]
pub struct RemoteCore<'a> {
    core: &'a CpuCore,
}

impl RemoteCore<'_> {
    /// Index of the remote core.
    pub fn id(&self) -> CoreId {
        self.core.id
    }

    /// Posts into the remote core's mailbox for `source`. Returns `false`
    /// if that mailbox still holds an unconsumed signal.
    pub fn post(&self, source: CoreId, kind: IciKind, arg: usize) -> bool {
        match self.core.mailboxes.get(source.index()) {
            Some(slot) => slot.post(kind, arg),
            None => false,
        }
    }

    /// Identity of the thread the remote core last published.
    pub fn active_thread_id(&self) -> Option<ThreadId> {
        self.core.active_thread_id()
    }
}

/// All cores, indexed by [`CoreId`].
#[derive(Debug)]
pub struct CoreArena {
    cores: Box<[CpuCore]>,
}

impl CoreArena {
    /// Allocates one record per configured core.
    pub fn new(config: &EngineConfig) -> Self {
        let cores: Vec<CpuCore> = (0..config.core_count)
            .map(|i| CpuCore::new(CoreId(i as u8), config.monitor_stacks[i]))
            .collect();
        Self {
            cores: cores.into_boxed_slice(),
        }
    }

    /// Number of cores.
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Always `false`; there is at least one core.
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// The record of `id`, for use by that core.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a configured core.
    pub fn get(&self, id: CoreId) -> &CpuCore {
        match self.cores.get(id.index()) {
            Some(core) => core,
            None => panic!("{} is not a configured core", id),
        }
    }

    /// Cross-core handle to `id`.
    pub fn remote(&self, id: CoreId) -> RemoteCore<'_> {
        RemoteCore { core: self.get(id) }
    }

    /// Iterates all cores.
    pub fn iter(&self) -> impl Iterator<Item = &CpuCore> {
        self.cores.iter()
    }
}
