//! Kestrel Hardware Abstraction Layer (HAL) traits.
//!
//! This crate defines the hardware capabilities the interrupt layer consumes.
//! A platform provides one implementation of each trait at boot; host tests
//! provide recording mocks.

#![no_std]

use core::ptr::NonNull;

use kestrel_common::{CoreId, CoreMask, InterruptFrame, Polarity, Trigger};

/// Port-mapped register access.
pub trait PortBus: Send + Sync {
    /// Reads one byte from `port`.
    fn read_u8(&self, port: u16) -> u8;
    /// Writes one byte to `port`.
    fn write_u8(&self, port: u16, value: u8);
}

/// Memory-mapped register access.
pub trait MmioBus: Send + Sync {
    /// Reads the 32-bit register at `addr`.
    fn read_u32(&self, addr: usize) -> u32;
    /// Writes the 32-bit register at `addr`.
    fn write_u32(&self, addr: usize, value: u32);
}

/// Entry point of a core's monitor, called on the monitor stack with the
/// core index as its only argument.
pub type MonitorEntry = extern "C" fn(usize) -> !;

/// Machine state handed to [`CpuControl::resume`].
#[derive(Debug)]
pub enum ResumeContext {
    /// A full register copy, restored from the current stack.
    Copied(InterruptFrame),
    /// A frame that already lives on the thread's own kernel stack.
    InPlace(NonNull<InterruptFrame>),
}

/// Control of the executing core.
pub trait CpuControl: Send + Sync {
    /// Index of the executing core.
    fn current_core(&self) -> CoreId;
    /// Returns `true` if local interrupts are enabled.
    fn interrupts_enabled(&self) -> bool;
    /// Disables local interrupts and returns whether they were enabled.
    fn disable_interrupts(&self) -> bool;
    /// Re-enables local interrupts if `was_enabled`.
    fn restore_interrupts(&self, was_enabled: bool);
    /// Address that caused the most recent page fault.
    fn fault_address(&self) -> u64;
    /// Reads one word of kernel stack, `None` if the address is unsafe.
    fn read_stack_word(&self, addr: u64) -> Option<u64>;
    /// Switches to `stack_top` and calls `entry`. Never returns.
    fn enter_monitor(&self, core: CoreId, stack_top: usize, entry: MonitorEntry) -> !;
    /// Restores `context` and returns into it. Never returns.
    fn resume(&self, core: CoreId, context: ResumeContext) -> !;
    /// Enables interrupts and waits; only an interrupt leaves this state.
    fn wait_for_interrupt(&self) -> !;
    /// Stops the core permanently.
    fn halt(&self) -> !;
}

/// Free-running high-frequency counter.
pub trait ClockSource: Send + Sync {
    /// Raw counter value.
    fn counter(&self) -> u64;
    /// Counter frequency in Hz.
    fn frequency(&self) -> u64;
}

/// The single global comparator used as the scheduler timer.
pub trait SchedulerTimer: Send + Sync {
    /// Disables the comparator interrupt.
    fn disable(&self);
    /// Programs the absolute counter value at which the comparator fires.
    fn set_compare(&self, value: u64);
    /// Enables the comparator interrupt.
    fn enable(&self);
}

/// The per-core one-shot timers.
pub trait LocalTimer: Send + Sync {
    /// Local timer rate in Hz.
    fn frequency(&self) -> u64;
    /// Programs `core`'s timer to fire once after `ticks` and unmasks it.
    fn start(&self, core: CoreId, ticks: u64);
    /// Masks `core`'s timer interrupt.
    fn stop(&self, core: CoreId);
}

/// Hardware that raises an interrupt on a set of cores.
pub trait IpiBroadcast: Send + Sync {
    /// Returns `true` while a previous broadcast is still being delivered.
    fn busy(&self) -> bool;
    /// Raises `vector` on every core in `targets`.
    fn send(&self, targets: CoreMask, vector: u8);
}

/// Where a shared line enters the interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Input `bit` (0..16) of the legacy cascaded pair.
    Legacy {
        /// Input number across both chips.
        bit: u8,
    },
    /// Entry `offset` of redirection controller `controller`.
    Redirection {
        /// Controller index.
        controller: u8,
        /// Redirection-table entry.
        offset: u8,
    },
}

/// A shared, system-wide interrupt controller family.
///
/// One implementation is selected at boot from platform discovery.
pub trait InterruptController: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;
    /// Translates a global line number to a controller input.
    fn route(&self, global_line: u32) -> Option<Route>;
    /// Programs the input's vector, polarity, trigger and target. The input
    /// is left masked.
    fn configure(
        &self,
        route: Route,
        vector: u8,
        polarity: Polarity,
        trigger: Trigger,
        target: CoreId,
    );
    /// Masks the input.
    fn mask(&self, route: Route);
    /// Unmasks the input.
    fn unmask(&self, route: Route);
    /// Acknowledges a serviced interrupt from the input.
    fn acknowledge(&self, route: Route);
}

/// Core-local interrupt sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalSource {
    /// Local timer.
    Timer,
    /// Controller error.
    Error,
    /// Performance counter overflow.
    Performance,
    /// Thermal sensor.
    Thermal,
}

/// The per-core local interrupt controller.
pub trait LocalInterruptController: Send + Sync {
    /// Programs `source` to deliver `vector`, masked.
    fn configure(&self, source: LocalSource, vector: u8);
    /// Masks `source`.
    fn mask(&self, source: LocalSource);
    /// Clears pending status for `source` and unmasks it.
    fn unmask(&self, source: LocalSource);
    /// Signals end of interrupt.
    fn end_of_interrupt(&self);
}
