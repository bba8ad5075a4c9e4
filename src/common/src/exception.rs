//! Kernel exception kinds and raw fault vectors.

use bitflags::bitflags;
use core::fmt;

/// Divide error.
pub const VECTOR_DIVIDE_ERROR: u8 = 0;
/// Stack segment fault.
pub const VECTOR_STACK_FAULT: u8 = 12;
/// General protection fault.
pub const VECTOR_GENERAL_PROTECTION: u8 = 13;
/// Page fault.
pub const VECTOR_PAGE_FAULT: u8 = 14;

/// Kernel-level classification of a processor fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum ExceptionKind {
    /// Memory access to an unmapped or protected address.
    Access = 1,
    /// Integer division by zero.
    ZeroDivide = 2,
    /// Privileged operation attempted without the privilege.
    Privilege = 3,
    /// Stack segment fault.
    Stack = 4,
    /// Any other fault vector.
    Unknown = 5,
}

impl ExceptionKind {
    /// Maps a raw fault vector to its kernel exception kind.
    pub const fn from_vector(vector: u8) -> Self {
        match vector {
            VECTOR_PAGE_FAULT => ExceptionKind::Access,
            VECTOR_DIVIDE_ERROR => ExceptionKind::ZeroDivide,
            VECTOR_GENERAL_PROTECTION => ExceptionKind::Privilege,
            VECTOR_STACK_FAULT => ExceptionKind::Stack,
            _ => ExceptionKind::Unknown,
        }
    }

    /// Numeric code stored in a trap result slot.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Inverse of [`ExceptionKind::code`].
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ExceptionKind::Access),
            2 => Some(ExceptionKind::ZeroDivide),
            3 => Some(ExceptionKind::Privilege),
            4 => Some(ExceptionKind::Stack),
            5 => Some(ExceptionKind::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Access => write!(f, "access violation"),
            ExceptionKind::ZeroDivide => write!(f, "divide by zero"),
            ExceptionKind::Privilege => write!(f, "privilege violation"),
            ExceptionKind::Stack => write!(f, "stack fault"),
            ExceptionKind::Unknown => write!(f, "unknown exception"),
        }
    }
}

bitflags! {
    /// Page-fault error code bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FaultFlags: u64 {
        /// The page was present (protection violation rather than not-present).
        const PRESENT = 1 << 0;
        /// The access was a write.
        const WRITE = 1 << 1;
        /// The access came from user mode.
        const USER = 1 << 2;
        /// The access was an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;

        const _ = !0;
    }
}
