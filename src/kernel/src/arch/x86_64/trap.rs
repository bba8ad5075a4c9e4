//! Exception traps around kernel code.
//!
//! [`guarded`] runs a closure with a trap mounted on the executing core's
//! active thread. A kernel exception inside the closure lands back in
//! [`guarded`] with the kind of exception instead of being fatal.

use kestrel_common::{ExceptionKind, InterruptFrame};
use x86_64::registers::rflags;

use super::idt::kestrel_trap_run;
use crate::exception::TRAP_FIRED;
use crate::thread::{ThreadRef, TrapSlot};
use crate::InterruptEngine;

struct Guarded<'a, F> {
    engine: &'a InterruptEngine,
    thread: &'a ThreadRef,
    body: Option<F>,
    slot: Option<TrapSlot>,
}

extern "C" fn run_guarded<F: FnOnce()>(ctx: *mut u8, sp: u64, ip: u64) {
    // SAFETY: `ctx` is the `Guarded<F>` owned by the `guarded` call that is
    // waiting in `kestrel_trap_run`.
    let guarded = unsafe { &mut *ctx.cast::<Guarded<'_, F>>() };
    let mut landing = InterruptFrame::kernel(ip, sp);
    landing.flags = rflags::read_raw();
    let slot = guarded.engine.mount_trap(guarded.thread, landing);
    guarded.slot = Some(slot.clone());
    if let Some(body) = guarded.body.take() {
        body();
    }
    guarded.engine.dismount_trap(guarded.thread, &slot);
}

/// Runs `body` with an exception trap mounted on the active thread.
///
/// A kernel exception raised inside `body` abandons the rest of it and is
/// returned as the error. Values `body` owned at that point are leaked, not
/// dropped.
///
/// # Panics
///
/// Panics if the executing core has no active thread or runs a user thread.
pub fn guarded<F: FnOnce()>(engine: &InterruptEngine, body: F) -> Result<(), ExceptionKind> {
    let core = engine.current_core();
    let Some(thread) = core.active_thread() else {
        panic!("{} has no active thread to mount a trap on", core.id());
    };
    let mut guarded = Guarded {
        engine,
        thread: &thread,
        body: Some(body),
        slot: None,
    };
    // SAFETY: `run_guarded::<F>` matches the layout of `guarded`, and the
    // landing frame it mounts points into `kestrel_trap_run`, which is still
    // on the stack whenever the trap can fire.
    let fired = unsafe {
        kestrel_trap_run(
            run_guarded::<F>,
            core::ptr::addr_of_mut!(guarded).cast::<u8>(),
        )
    };
    if fired != TRAP_FIRED {
        return Ok(());
    }
    let kind = guarded.slot.as_ref().and_then(TrapSlot::result);
    Err(kind.unwrap_or(ExceptionKind::Unknown))
}
