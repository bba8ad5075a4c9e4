//! Spin lock that masks local interrupts while held.

use alloc::sync::Arc;
use core::ops::{Deref, DerefMut};

use kestrel_hal::CpuControl;
use spin::{Mutex, MutexGuard};

/// A spin lock whose guard keeps local interrupts disabled.
///
/// # Example
///
/// ```ignore
/// let table = IrqSpinlock::new(cpu.clone(), Vec::new());
/// {
///     let mut guard = table.lock();
///     guard.push(1);
/// } // interrupts restored here
/// ```
pub struct IrqSpinlock<T> {
    cpu: Arc<dyn CpuControl>,
    inner: Mutex<T>,
}

impl<T> IrqSpinlock<T> {
    /// Creates an unlocked lock around `data`.
    pub fn new(cpu: Arc<dyn CpuControl>, data: T) -> Self {
        Self {
            cpu,
            inner: Mutex::new(data),
        }
    }

    /// Disables local interrupts, then spins until the lock is acquired.
    pub fn lock(&self) -> IrqSpinlockGuard<'_, T> {
        let was_enabled = self.cpu.disable_interrupts();
        let guard = self.inner.lock();
        IrqSpinlockGuard {
            cpu: &*self.cpu,
            was_enabled,
            guard: Some(guard),
        }
    }

    /// Returns `true` if some core holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// RAII guard that releases the lock and then restores interrupts.
pub struct IrqSpinlockGuard<'a, T> {
    cpu: &'a dyn CpuControl,
    was_enabled: bool,
    guard: Option<MutexGuard<'a, T>>,
}

impl<T> Deref for IrqSpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The option is only emptied in drop.
        self.guard.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for IrqSpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for IrqSpinlockGuard<'_, T> {
    fn drop(&mut self) {
        // Release before re-enabling, never the other way round.
        drop(self.guard.take());
        self.cpu.restore_interrupts(self.was_enabled);
    }
}
