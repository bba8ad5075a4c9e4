//! Executing-core control.

use core::arch::asm;
use core::ptr;

use kestrel_common::{CoreId, InterruptFrame};
use kestrel_hal::{CpuControl, MonitorEntry, ResumeContext};
use x86_64::instructions::interrupts;
use x86_64::registers::control::Cr2;
use x86_64::VirtAddr;

use super::idt::kestrel_resume_frame;
use super::memory;
use crate::irq::lapic::LocalApic;

/// [`CpuControl`] for x86_64 cores. Core identity is the local APIC id.
pub struct X86Cpu {
    lapic: LocalApic,
    phys_offset: VirtAddr,
}

impl X86Cpu {
    /// Control for cores whose local APIC is reached through `lapic`.
    /// `phys_offset` is where the bootloader mapped physical memory.
    pub fn new(lapic: LocalApic, phys_offset: VirtAddr) -> Self {
        Self { lapic, phys_offset }
    }
}

impl CpuControl for X86Cpu {
    fn current_core(&self) -> CoreId {
        CoreId(self.lapic.id())
    }

    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn disable_interrupts(&self) -> bool {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        was_enabled
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            interrupts::enable();
        }
    }

    fn fault_address(&self) -> u64 {
        Cr2::read().as_u64()
    }

    fn read_stack_word(&self, addr: u64) -> Option<u64> {
        if addr % 8 != 0 {
            return None;
        }
        let addr = VirtAddr::try_new(addr).ok()?;
        if !memory::is_mapped(self.phys_offset, addr) {
            return None;
        }
        // SAFETY: aligned and backed by a present page.
        Some(unsafe { ptr::read_volatile(addr.as_ptr::<u64>()) })
    }

    fn enter_monitor(&self, core: CoreId, stack_top: usize, entry: MonitorEntry) -> ! {
        // SAFETY: the monitor stack is reserved for this core and nothing on
        // the abandoned stack is used again. The call leaves the stack
        // aligned the way the callee expects.
        unsafe {
            asm!(
                "mov rsp, {stack}",
                "xor ebp, ebp",
                "call {entry}",
                "ud2",
                stack = in(reg) stack_top & !0xF,
                entry = in(reg) entry,
                in("rdi") core.index(),
                options(noreturn)
            )
        }
    }

    fn resume(&self, _core: CoreId, context: ResumeContext) -> ! {
        match context {
            // The copy sits in this function's frame; the restore path pops
            // it before anything can reuse that stack.
            ResumeContext::Copied(frame) => {
                // SAFETY: the frame was validated by the engine.
                unsafe { kestrel_resume_frame(&frame) }
            }
            ResumeContext::InPlace(frame) => {
                // SAFETY: the frame lives on the suspended thread's stack.
                unsafe { kestrel_resume_frame(frame.as_ptr()) }
            }
        }
    }

    fn wait_for_interrupt(&self) -> ! {
        loop {
            interrupts::enable_and_hlt();
        }
    }

    fn halt(&self) -> ! {
        super::halt_loop()
    }
}

/// First saved context of a kernel thread that starts at `entry` on the
/// stack ending at `stack_top`.
pub fn kernel_thread_frame(entry: extern "C" fn() -> !, stack_top: u64) -> InterruptFrame {
    // A call leaves the stack 8 bytes below a 16-byte boundary.
    InterruptFrame::kernel(entry as usize as u64, (stack_top & !0xF) - 8)
}
