//! Errors returned to drivers and to the scheduler.

use core::fmt;

/// Device interrupt routing table errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IrqError {
    /// The line number is outside the table.
    InvalidLine,
    /// A handler is already registered on the line.
    AlreadyInstalled,
    /// No handler is registered on the line.
    NotInstalled,
    /// The registered handler is not the caller's.
    HandlerMismatch,
    /// The platform has no controller input for the line.
    NoRoute,
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqError::InvalidLine => write!(f, "invalid interrupt line"),
            IrqError::AlreadyInstalled => write!(f, "line already has a handler"),
            IrqError::NotInstalled => write!(f, "line has no handler"),
            IrqError::HandlerMismatch => write!(f, "handler does not own the line"),
            IrqError::NoRoute => write!(f, "no controller route for line"),
        }
    }
}

/// Per-core timer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerError {
    /// The core's local timer is already armed.
    AlreadyArmed,
    /// A zero delay was requested.
    ZeroDelay,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::AlreadyArmed => write!(f, "core timer already armed"),
            TimerError::ZeroDelay => write!(f, "core timer delay is zero"),
        }
    }
}
