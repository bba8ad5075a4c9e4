//! Kestrel interrupt layer.
//!
//! Multicore interrupt dispatch, inter-core signalling and monitor
//! entry/exit for the Kestrel kernel.
//!
//! # Architecture
//!
//! - [`engine`]: the [`InterruptEngine`] and its driver and scheduler
//!   interfaces
//! - [`cpu`]: per-core records and the cross-core handle
//! - [`timer`]: counter, scheduler timer and per-core timers
//! - [`hpet`]: the counter and scheduler comparator hardware
//! - [`ici`]: inter-core signal mailboxes
//! - [`irq`]: device routing table and controller backends
//! - [`monitor`]: monitor entry, idle and thread resume
//! - [`diag`]: fatal dump and stack walk
//! - `arch`: the bare-metal x86_64 backend
//!
//! All hardware is reached through `kestrel-hal` traits, so everything but
//! `arch` runs under host unit tests.
//!
//! # Safety
//!
//! All unsafe code is documented with the invariant that makes it sound.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(target_os = "none")]
pub mod allocator;
#[cfg(target_os = "none")]
pub mod arch;
pub mod config;
pub mod cpu;
pub mod diag;
mod dispatch;
pub mod engine;
pub mod event;
pub mod exception;
pub mod hpet;
pub mod ici;
pub mod irq;
pub mod monitor;
pub mod services;
pub mod sync;
mod syscall;
pub mod thread;
pub mod timer;

#[cfg(test)]
pub mod testutil;

pub use engine::{InterruptEngine, Platform};

static ENGINE: spin::Once<InterruptEngine> = spin::Once::new();

/// Publishes the engine used by the interrupt entry path. Later calls keep
/// the first engine.
pub fn install(engine: InterruptEngine) -> &'static InterruptEngine {
    ENGINE.call_once(|| engine)
}

/// The published engine, `None` before [`install`].
pub fn engine() -> Option<&'static InterruptEngine> {
    ENGINE.get()
}
