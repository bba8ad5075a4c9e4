//! The slice of a scheduler thread the interrupt layer reads and writes.
//!
//! Threads are owned by the scheduler. The interrupt layer only holds a
//! [`ThreadRef`] for the duration of one interrupt or monitor transition,
//! except for the core's active-thread slot, which is handed over at resume.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use kestrel_common::{ExceptionKind, InterruptFrame, ProcessId, ThreadId};
use spin::Mutex;

/// Shared handle to a scheduler-owned thread.
pub type ThreadRef = Arc<Mutex<Thread>>;

/// Privilege mode a thread runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    /// Runs in kernel mode on its own kernel stack.
    Kernel,
    /// Runs in user mode inside `process`.
    User {
        /// Owning process.
        process: ProcessId,
    },
}

/// Pointer to a context frame on a kernel thread's own stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePtr(NonNull<InterruptFrame>);

// SAFETY: the frame lives on the stack of the kernel thread that owns this
// pointer and is only dereferenced by the core that is switching that
// thread in or out.
unsafe impl Send for FramePtr {}

impl FramePtr {
    /// Wraps the address of a live frame.
    pub fn new(frame: &mut InterruptFrame) -> Self {
        FramePtr(NonNull::from(frame))
    }

    /// Raw pointer.
    pub fn as_non_null(self) -> NonNull<InterruptFrame> {
        self.0
    }

    /// Mutable access to the frame.
    ///
    /// # Safety
    ///
    /// The owning thread must not be running, its stack must still hold the
    /// frame that was captured, and no other reference to the frame may
    /// exist.
    pub unsafe fn get_mut<'a>(self) -> &'a mut InterruptFrame {
        // SAFETY: upheld by the caller.
        unsafe { &mut *self.0.as_ptr() }
    }
}

/// Where a suspended thread's machine state lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SavedContext {
    /// The thread is running, or has never run.
    #[default]
    None,
    /// Kernel thread: its frame stays on its own stack.
    KernelFrame(FramePtr),
    /// User thread: a full register copy, since its frame lives in a space
    /// that may not be mapped once the core switches page tables.
    User(Box<InterruptFrame>),
}

/// The last fault a thread took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastException {
    /// Classified kind.
    pub kind: ExceptionKind,
    /// Faulting address.
    pub fault_addr: u64,
    /// The page was present.
    pub page_was_present: bool,
    /// The access was a write.
    pub was_write: bool,
    /// High-frequency tick of the fault.
    pub timestamp: u64,
}

/// System call bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyscallState {
    /// A call entered the kernel and has not been completed.
    pub in_flight: bool,
    /// Call id.
    pub id: u64,
    /// First argument.
    pub arg0: u64,
    /// Value written to the result register on resume.
    pub result: u64,
}

/// Result slot of a mounted exception trap.
///
/// The mounting code keeps a clone and reads it after control comes back to
/// the mount site.
#[derive(Debug, Clone, Default)]
pub struct TrapSlot(Arc<AtomicU32>);

impl TrapSlot {
    /// Exception that fired the trap, `None` if it has not fired.
    pub fn result(&self) -> Option<ExceptionKind> {
        ExceptionKind::from_code(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn fire(&self, kind: ExceptionKind) {
        self.0.store(kind.code(), Ordering::Release);
    }

    fn same(&self, other: &TrapSlot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A mounted exception trap.
#[derive(Debug, Clone)]
pub struct TrapRecord {
    /// Register state at the mount site.
    pub context: InterruptFrame,
    /// Where the exception kind is reported.
    pub slot: TrapSlot,
}

/// Scheduler thread state touched by the interrupt layer.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    mode: ThreadMode,
    /// Machine state while not active on a core.
    pub saved: SavedContext,
    /// Last fault taken.
    pub last_exception: Option<LastException>,
    /// System-call bookkeeping.
    pub syscall: SyscallState,
    /// Remaining quantum in global high-frequency ticks.
    pub quantum_ticks: u64,
    traps: Vec<TrapRecord>,
}

impl Thread {
    /// A kernel-mode thread.
    pub fn kernel(id: ThreadId) -> Self {
        Self::with_mode(id, ThreadMode::Kernel)
    }

    /// A user-mode thread of `process`.
    pub fn user(id: ThreadId, process: ProcessId) -> Self {
        Self::with_mode(id, ThreadMode::User { process })
    }

    fn with_mode(id: ThreadId, mode: ThreadMode) -> Self {
        Self {
            id,
            mode,
            saved: SavedContext::None,
            last_exception: None,
            syscall: SyscallState::default(),
            quantum_ticks: 0,
            traps: Vec::new(),
        }
    }

    /// Wraps the thread in a shared handle.
    pub fn into_ref(self) -> ThreadRef {
        Arc::new(Mutex::new(self))
    }

    /// Thread identity.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Privilege mode.
    pub fn mode(&self) -> ThreadMode {
        self.mode
    }

    /// Returns `true` for user-mode threads.
    pub fn is_user(&self) -> bool {
        matches!(self.mode, ThreadMode::User { .. })
    }

    /// Owning process of a user thread.
    pub fn process(&self) -> Option<ProcessId> {
        match self.mode {
            ThreadMode::User { process } => Some(process),
            ThreadMode::Kernel => None,
        }
    }

    /// Pushes a trap that resumes at `context` if a fault occurs before it
    /// is dismounted. Kernel code mounts through
    /// [`InterruptEngine::mount_trap`](crate::InterruptEngine::mount_trap),
    /// which keeps interrupts off while the thread is locked.
    ///
    /// # Panics
    ///
    /// Panics for user-mode threads; traps are a kernel-mode facility.
    pub(crate) fn mount_trap(&mut self, context: InterruptFrame) -> TrapSlot {
        assert!(!self.is_user(), "{} is a user thread and cannot mount traps", self.id);
        let slot = TrapSlot::default();
        self.traps.push(TrapRecord {
            context,
            slot: slot.clone(),
        });
        slot
    }

    /// Pops the innermost trap on normal fall-through.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not the innermost mounted trap.
    pub(crate) fn dismount_trap(&mut self, slot: &TrapSlot) {
        match self.traps.pop() {
            Some(top) if top.slot.same(slot) => {}
            _ => panic!("{} dismounted a trap that is not innermost", self.id),
        }
    }

    /// Number of mounted traps.
    pub fn trap_depth(&self) -> usize {
        self.traps.len()
    }

    pub(crate) fn pop_trap(&mut self) -> Option<TrapRecord> {
        self.traps.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traps_nest() {
        let mut thread = Thread::kernel(ThreadId(1));
        let outer = thread.mount_trap(InterruptFrame::kernel(0x100, 0x8000));
        let inner = thread.mount_trap(InterruptFrame::kernel(0x200, 0x7000));
        assert_eq!(thread.trap_depth(), 2);

        thread.dismount_trap(&inner);
        let top = thread.pop_trap().unwrap();
        assert_eq!(top.context.ip, 0x100);
        assert!(top.slot.same(&outer));
        assert!(outer.result().is_none());
    }

    #[test]
    #[should_panic(expected = "not innermost")]
    fn test_dismount_out_of_order() {
        let mut thread = Thread::kernel(ThreadId(1));
        let outer = thread.mount_trap(InterruptFrame::default());
        let _inner = thread.mount_trap(InterruptFrame::default());
        thread.dismount_trap(&outer);
    }

    #[test]
    #[should_panic(expected = "cannot mount traps")]
    fn test_user_thread_cannot_mount() {
        let mut thread = Thread::user(ThreadId(2), ProcessId(1));
        thread.mount_trap(InterruptFrame::default());
    }

    #[test]
    fn test_trap_slot_reports_kind() {
        let slot = TrapSlot::default();
        slot.fire(ExceptionKind::ZeroDivide);
        assert_eq!(slot.result(), Some(ExceptionKind::ZeroDivide));
    }
}
