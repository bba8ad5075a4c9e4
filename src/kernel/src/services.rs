//! Interfaces of the collaborators the interrupt layer calls out to.
//!
//! The scheduler, system-call dispatcher, inter-core signal consumer,
//! address-space manager and symbol table all live outside this crate. They
//! are reached only through these traits.

use alloc::boxed::Box;

use kestrel_common::{CoreId, IciKind, ProcessId};
use kestrel_hal::MonitorEntry;

use crate::cpu::CpuCore;
use crate::thread::ThreadRef;

/// Kernel system-call dispatcher.
pub trait SyscallDispatcher: Send + Sync {
    /// Services the call recorded in `thread`'s syscall state. The value left
    /// in `result` is returned to the caller if the thread resumes directly
    /// from this interrupt.
    fn on_system_call(&self, core: &CpuCore, thread: &ThreadRef, result: &mut u64);
}

/// Consumer of inter-core signals.
pub trait IciConsumer: Send + Sync {
    /// Handles `kind` posted by `source` with its opaque `arg`.
    fn on_inter_core_signal(
        &self,
        core: &CpuCore,
        thread: Option<&ThreadRef>,
        source: CoreId,
        kind: IciKind,
        arg: usize,
    );
}

/// Handler registered on a device line.
pub trait DeviceIrqHandler: Send + Sync {
    /// Services one interrupt on the handler's line.
    fn on_irq(&self, core: &CpuCore);
}

/// Address-space manager: which process is mapped on each core.
pub trait AddressSpace: Send + Sync {
    /// Process whose mappings are live on `core`, `None` for kernel-only.
    fn mapped_process(&self, core: CoreId) -> Option<ProcessId>;
}

/// A resolved code address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name.
    pub name: &'static str,
    /// Distance from the symbol start.
    pub offset: u64,
}

/// Symbol table used on the fatal path only.
pub trait SymbolLookup: Send + Sync {
    /// Closest symbol at or below `addr` in `process` (kernel if `None`).
    fn find_closest_symbol(&self, process: Option<ProcessId>, addr: u64) -> Option<Symbol>;
}

/// Symbol lookup that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolLookup for NoSymbols {
    fn find_closest_symbol(&self, _process: Option<ProcessId>, _addr: u64) -> Option<Symbol> {
        None
    }
}

/// Everything outside the interrupt layer that it depends on.
pub struct Services {
    /// System-call dispatcher.
    pub syscalls: Box<dyn SyscallDispatcher>,
    /// Inter-core signal consumer.
    pub signals: Box<dyn IciConsumer>,
    /// Address-space manager.
    pub address_space: Box<dyn AddressSpace>,
    /// Symbol table.
    pub symbols: Box<dyn SymbolLookup>,
    /// Monitor entry point run on each core's monitor stack.
    pub monitor: MonitorEntry,
}
