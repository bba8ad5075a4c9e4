//! Saved machine state at an interrupt boundary.
//!
//! The layout of [`InterruptFrame`] matches the order in which the x86_64
//! entry stubs push state: general registers first (lowest address), then the
//! vector and error code, then the hardware-pushed return frame.

use bitflags::bitflags;

/// Kernel code segment selector.
pub const KERNEL_CODE_SELECTOR: u64 = 0x08;
/// Kernel data/stack segment selector.
pub const KERNEL_DATA_SELECTOR: u64 = 0x10;
/// User code segment selector (RPL 3).
pub const USER_CODE_SELECTOR: u64 = 0x23;
/// User data/stack segment selector (RPL 3).
pub const USER_DATA_SELECTOR: u64 = 0x1B;

/// Requested-privilege bits of a selector.
const SELECTOR_RPL_MASK: u64 = 0x3;
/// Privilege level of user mode.
const USER_PRIVILEGE: u64 = 3;

bitflags! {
    /// Bits of the saved flags register the interrupt layer cares about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RFlags: u64 {
        /// Always-one reserved bit.
        const RESERVED_1 = 1 << 1;
        /// Interrupts enabled.
        const INTERRUPT_ENABLE = 1 << 9;
        /// Direction flag.
        const DIRECTION = 1 << 10;

        const _ = !0;
    }
}

/// General purpose registers in stub push order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct GeneralRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// Complete machine context captured at interrupt entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InterruptFrame {
    /// General purpose registers.
    pub regs: GeneralRegisters,
    /// Vector that was taken.
    pub vector: u64,
    /// Hardware error code, zero for vectors without one.
    pub error_code: u64,
    /// Instruction pointer to resume at.
    pub ip: u64,
    /// Code segment selector.
    pub cs: u64,
    /// Flags register.
    pub flags: u64,
    /// Stack pointer to resume with.
    pub sp: u64,
    /// Stack segment selector.
    pub ss: u64,
}

impl InterruptFrame {
    /// Builds an empty frame that would resume in kernel mode at `ip`.
    pub fn kernel(ip: u64, sp: u64) -> Self {
        Self {
            ip,
            sp,
            cs: KERNEL_CODE_SELECTOR,
            ss: KERNEL_DATA_SELECTOR,
            flags: (RFlags::RESERVED_1 | RFlags::INTERRUPT_ENABLE).bits(),
            ..Default::default()
        }
    }

    /// Builds an empty frame that would resume in user mode at `ip`.
    pub fn user(ip: u64, sp: u64) -> Self {
        Self {
            ip,
            sp,
            cs: USER_CODE_SELECTOR,
            ss: USER_DATA_SELECTOR,
            flags: (RFlags::RESERVED_1 | RFlags::INTERRUPT_ENABLE).bits(),
            ..Default::default()
        }
    }

    /// Returns `true` if the interrupted code ran at user privilege.
    pub fn is_user(&self) -> bool {
        self.cs & SELECTOR_RPL_MASK == USER_PRIVILEGE
    }

    /// Saved flags as a typed set.
    pub fn rflags(&self) -> RFlags {
        RFlags::from_bits_retain(self.flags)
    }

    /// Returns `true` if the interrupted code had interrupts enabled.
    pub fn interrupts_enabled(&self) -> bool {
        self.rflags().contains(RFlags::INTERRUPT_ENABLE)
    }

    /// Sets the interrupt-enable bit in the saved flags.
    pub fn enable_interrupts(&mut self) {
        self.flags |= RFlags::INTERRUPT_ENABLE.bits();
    }

    /// Returns `true` if the selectors describe the privilege level the frame
    /// claims (`user` or kernel).
    pub fn selectors_match(&self, user: bool) -> bool {
        if user {
            self.cs == USER_CODE_SELECTOR && self.ss == USER_DATA_SELECTOR
        } else {
            self.cs == KERNEL_CODE_SELECTOR && self.ss == KERNEL_DATA_SELECTOR
        }
    }
}
