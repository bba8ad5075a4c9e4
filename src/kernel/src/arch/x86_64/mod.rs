//! x86_64 backend.
//!
//! Entry stubs and descriptor tables, the port and MMIO buses, the
//! executing-core control, exception traps and the boot sequence that
//! assembles them into a [`crate::Platform`].

pub mod bus;
pub mod cpu;
pub mod gdt;
pub mod idt;
pub mod memory;
pub mod pic;
pub mod platform;
pub mod serial;
pub mod trap;

/// Halts the CPU until the next interrupt.
#[inline]
pub fn hlt() {
    x86_64::instructions::hlt();
}

/// Halts the CPU with interrupts off, forever.
pub fn halt_loop() -> ! {
    x86_64::instructions::interrupts::disable();
    loop {
        hlt();
    }
}
