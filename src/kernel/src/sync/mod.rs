//! Synchronization primitives for interrupt context.
//!
//! Nothing in the interrupt layer may block. Shared tables are protected by
//! [`IrqSpinlock`], a spin lock that also disables local interrupts for as
//! long as it is held, so an interrupt on the same core can never spin on a
//! lock its own interrupted context holds.

mod irq_lock;

pub use irq_lock::{IrqSpinlock, IrqSpinlockGuard};
