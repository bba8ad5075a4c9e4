//! Plain data types shared by the Kestrel interrupt layer and its HAL.
//!
//! Nothing in this crate touches hardware. The types here describe cores,
//! interrupt lines, saved machine state and the error values returned to
//! drivers and the scheduler.

#![no_std]
#![warn(missing_docs)]

pub mod context;
pub mod cpu;
pub mod error;
pub mod exception;
pub mod ici;
pub mod ids;
pub mod irq;

pub use context::{GeneralRegisters, InterruptFrame, RFlags};
pub use cpu::{CoreId, CoreMask, MAX_CORES};
pub use error::{IrqError, TimerError};
pub use exception::{ExceptionKind, FaultFlags};
pub use ici::IciKind;
pub use ids::{ProcessId, ThreadId};
pub use irq::{IrqConfig, IrqLine, IrqOverride, Polarity, Trigger};
