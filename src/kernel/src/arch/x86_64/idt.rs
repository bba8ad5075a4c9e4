//! Interrupt descriptor table and the common entry path.
//!
//! Every vector has its own 16-byte stub. A stub pushes a zero error code
//! when the processor does not push one, then its vector number, and jumps
//! to `kestrel_isr_common`. The common path saves the general registers so
//! that the stack holds an [`InterruptFrame`], hands it to the engine and
//! restores it, which lets the engine rewrite the frame in place.
//!
//! `kestrel_trap_run` is the landing pad for exception traps: the frame a
//! trap resumes through points at it, with the stack it had when the
//! guarded body was called.

use core::arch::global_asm;

use kestrel_common::InterruptFrame;
use lazy_static::lazy_static;
use log::error;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::{PrivilegeLevel, VirtAddr};

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use crate::config::SYSCALL_VECTOR;

/// Bytes between consecutive stubs.
const STUB_SIZE: u64 = 16;

global_asm!(
    r#"
    .section .text
    .global kestrel_isr_stubs
    .p2align 4
kestrel_isr_stubs:
    .set kestrel_vec, 0
    .rept 256
    .p2align 4
    .if (kestrel_vec == 8) || ((kestrel_vec >= 10) && (kestrel_vec <= 14)) || (kestrel_vec == 17) || (kestrel_vec == 21) || (kestrel_vec == 29) || (kestrel_vec == 30)
    .else
    .byte 0x6a, 0x00
    .endif
    .byte 0x68
    .long kestrel_vec
    jmp kestrel_isr_common
    .set kestrel_vec, kestrel_vec + 1
    .endr

kestrel_isr_common:
    push r15
    push r14
    push r13
    push r12
    push r11
    push r10
    push r9
    push r8
    push rbp
    push rdi
    push rsi
    push rdx
    push rcx
    push rbx
    push rax
    cld
    mov rdi, rsp
    call kestrel_interrupt_entry

    .global kestrel_isr_return
kestrel_isr_return:
    pop rax
    pop rbx
    pop rcx
    pop rdx
    pop rsi
    pop rdi
    pop rbp
    pop r8
    pop r9
    pop r10
    pop r11
    pop r12
    pop r13
    pop r14
    pop r15
    add rsp, 16
    iretq

    .global kestrel_resume_frame
kestrel_resume_frame:
    mov rsp, rdi
    jmp kestrel_isr_return

    .global kestrel_trap_run
kestrel_trap_run:
    push rbx
    push rbp
    push r12
    push r13
    push r14
    push r15
    sub rsp, 8
    mov rax, rdi
    mov rdi, rsi
    mov rsi, rsp
    lea rdx, [rip + kestrel_trap_landing]
    call rax
    xor eax, eax
kestrel_trap_landing:
    add rsp, 8
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbp
    pop rbx
    ret
"#
);

extern "C" {
    static kestrel_isr_stubs: u8;
    /// Loads the stack pointer with `frame` and returns through it.
    pub(super) fn kestrel_resume_frame(frame: *const InterruptFrame) -> !;
    /// Saves the callee-saved registers and calls `body(ctx, sp, ip)`.
    /// Returns 0 when `body` returns. A frame resuming at `ip` on stack
    /// `sp` returns its `rax` from here instead.
    pub(super) fn kestrel_trap_run(
        body: extern "C" fn(*mut u8, u64, u64),
        ctx: *mut u8,
    ) -> u64;
}

fn stub(vector: u8) -> VirtAddr {
    // SAFETY: only the address of the stub table is taken.
    let base = unsafe { core::ptr::addr_of!(kestrel_isr_stubs) };
    VirtAddr::from_ptr(base) + u64::from(vector) * STUB_SIZE
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        // SAFETY: every stub follows the interrupt calling convention and
        // returns with iretq.
        unsafe {
            idt.divide_error.set_handler_addr(stub(0));
            idt.debug.set_handler_addr(stub(1));
            idt.non_maskable_interrupt.set_handler_addr(stub(2));
            idt.breakpoint
                .set_handler_addr(stub(3))
                .set_privilege_level(PrivilegeLevel::Ring3);
            idt.overflow.set_handler_addr(stub(4));
            idt.bound_range_exceeded.set_handler_addr(stub(5));
            idt.invalid_opcode.set_handler_addr(stub(6));
            idt.device_not_available.set_handler_addr(stub(7));
            idt.double_fault
                .set_handler_addr(stub(8))
                .set_stack_index(DOUBLE_FAULT_IST_INDEX);
            idt.invalid_tss.set_handler_addr(stub(10));
            idt.segment_not_present.set_handler_addr(stub(11));
            idt.stack_segment_fault.set_handler_addr(stub(12));
            idt.general_protection_fault.set_handler_addr(stub(13));
            idt.page_fault.set_handler_addr(stub(14));
            idt.x87_floating_point.set_handler_addr(stub(16));
            idt.alignment_check.set_handler_addr(stub(17));
            idt.machine_check.set_handler_addr(stub(18));
            idt.simd_floating_point.set_handler_addr(stub(19));
            idt.virtualization.set_handler_addr(stub(20));
            idt.security_exception.set_handler_addr(stub(30));

            for vector in 32..=255u8 {
                let options = idt[usize::from(vector)].set_handler_addr(stub(vector));
                if vector == SYSCALL_VECTOR {
                    options.set_privilege_level(PrivilegeLevel::Ring3);
                }
            }
        }
        idt
    };
}

/// Loads the IDT on the executing core.
pub fn init() {
    IDT.load();
}

#[no_mangle]
extern "C" fn kestrel_interrupt_entry(frame: &mut InterruptFrame) {
    match crate::engine() {
        Some(engine) => engine.handle_interrupt(frame),
        None if frame.vector < 32 => {
            error!("exception {} before the engine was installed", frame.vector);
            error!("  ip {:#018x} error {:#x}", frame.ip, frame.error_code);
            super::halt_loop()
        }
        // Nothing is unmasked before the engine is installed.
        None => {}
    }
}
