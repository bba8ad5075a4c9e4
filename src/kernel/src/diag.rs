//! Fatal diagnostics.
//!
//! Dumps everything known about the failing core, stops the other cores
//! and panics. The panic handler halts the core.

use core::fmt;

use kestrel_common::{CoreMask, IciKind, InterruptFrame, ProcessId};
use log::error;

use crate::cpu::CpuCore;
use crate::engine::InterruptEngine;

/// Frames followed by the stack walk.
pub const MAX_STACK_DEPTH: usize = 16;

/// One resolved return address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    /// Return address.
    pub addr: u64,
    /// Closest symbol and offset, if resolved.
    pub symbol: Option<(&'static str, u64)>,
}

impl InterruptEngine {
    /// Logs a full dump for `core`, halts every other core and panics with
    /// `reason`.
    pub(crate) fn fatal(
        &self,
        core: &CpuCore,
        frame: &InterruptFrame,
        reason: fmt::Arguments<'_>,
    ) -> ! {
        let process = self.services.address_space.mapped_process(core.id());
        error!("FATAL on {}: {}", core.id(), reason);
        error!(
            "  thread {:?} process {:?} in_monitor={} idle={}",
            core.active_thread_id(),
            process,
            core.is_in_monitor(),
            core.is_idle()
        );
        dump_frame(frame);
        for (depth, entry) in self.walk_stack(frame, process).iter().enumerate() {
            match entry.symbol {
                Some((name, offset)) => {
                    error!("  #{:<2} {:#018x} {}+{:#x}", depth, entry.addr, name, offset)
                }
                None => error!("  #{:<2} {:#018x}", depth, entry.addr),
            }
        }

        let others = CoreMask::all(self.cores.len()).without(core.id());
        if !others.is_empty() {
            self.ici.send(&self.cores, core.id(), others, IciKind::HALT, 0);
        }
        panic!("{}: {}", core.id(), reason)
    }

    /// Follows saved frame pointers from `frame`, resolving each return
    /// address. Stops at the first unreadable word, a pointer that does not
    /// move up the stack, or [`MAX_STACK_DEPTH`] entries.
    pub fn walk_stack(
        &self,
        frame: &InterruptFrame,
        process: Option<ProcessId>,
    ) -> StackTrace {
        let mut trace = StackTrace::default();
        let resolve = |addr: u64| {
            self.services
                .symbols
                .find_closest_symbol(process, addr)
                .map(|s| (s.name, s.offset))
        };
        trace.push(StackFrame {
            addr: frame.ip,
            symbol: resolve(frame.ip),
        });

        let mut fp = frame.regs.rbp;
        while !trace.is_full() && fp != 0 {
            let Some(ret) = self.cpu.read_stack_word(fp.wrapping_add(8)) else {
                break;
            };
            let Some(next) = self.cpu.read_stack_word(fp) else {
                break;
            };
            trace.push(StackFrame {
                addr: ret,
                symbol: resolve(ret),
            });
            if next <= fp {
                break;
            }
            fp = next;
        }
        trace
    }
}

fn dump_frame(frame: &InterruptFrame) {
    let r = &frame.regs;
    error!(
        "  vector {:#x} error {:#x} ip {:#018x} sp {:#018x} flags {:#x} cs {:#x} ss {:#x}",
        frame.vector, frame.error_code, frame.ip, frame.sp, frame.flags, frame.cs, frame.ss
    );
    error!("  rax {:#018x} rbx {:#018x} rcx {:#018x} rdx {:#018x}", r.rax, r.rbx, r.rcx, r.rdx);
    error!("  rsi {:#018x} rdi {:#018x} rbp {:#018x} r8  {:#018x}", r.rsi, r.rdi, r.rbp, r.r8);
    error!("  r9  {:#018x} r10 {:#018x} r11 {:#018x} r12 {:#018x}", r.r9, r.r10, r.r11, r.r12);
    error!("  r13 {:#018x} r14 {:#018x} r15 {:#018x}", r.r13, r.r14, r.r15);
}

/// Up to [`MAX_STACK_DEPTH`] frames, innermost first. Fixed capacity, as
/// the fatal path must not allocate.
#[derive(Debug, Clone, Copy)]
pub struct StackTrace {
    frames: [StackFrame; MAX_STACK_DEPTH],
    len: usize,
}

impl Default for StackTrace {
    fn default() -> Self {
        Self {
            frames: [StackFrame { addr: 0, symbol: None }; MAX_STACK_DEPTH],
            len: 0,
        }
    }
}

impl StackTrace {
    fn push(&mut self, frame: StackFrame) {
        if let Some(slot) = self.frames.get_mut(self.len) {
            *slot = frame;
            self.len += 1;
        }
    }

    fn is_full(&self) -> bool {
        self.len == MAX_STACK_DEPTH
    }

    /// Frames collected.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates the collected frames.
    pub fn iter(&self) -> impl Iterator<Item = &StackFrame> {
        self.frames[..self.len].iter()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use kestrel_common::{CoreId, ThreadId};

    use crate::testutil::EngineRig;
    use crate::thread::Thread;

    use super::*;

    fn frame_with_chain(rig: &EngineRig) -> InterruptFrame {
        // Three frames: 0x9000 -> 0x9100 -> 0x9200 -> end.
        rig.cpu.set_stack_word(0x9008, 0x1100);
        rig.cpu.set_stack_word(0x9000, 0x9100);
        rig.cpu.set_stack_word(0x9108, 0x2050);
        rig.cpu.set_stack_word(0x9100, 0x9200);
        rig.cpu.set_stack_word(0x9208, 0x3000);
        rig.cpu.set_stack_word(0x9200, 0);
        let mut frame = InterruptFrame::kernel(0x1010, 0x8F00);
        frame.regs.rbp = 0x9000;
        frame
    }

    #[test]
    fn test_walk_follows_frame_pointers() {
        let rig = EngineRig::new(1);
        rig.symbols.insert(0x1000, "dispatch_loop");
        rig.symbols.insert(0x2000, "run_monitor");
        let trace = rig.engine.walk_stack(&frame_with_chain(&rig), None);

        let addrs: Vec<u64> = trace.iter().map(|f| f.addr).collect();
        assert_eq!(addrs, [0x1010, 0x1100, 0x2050, 0x3000]);
        let first = trace.iter().next().unwrap();
        assert_eq!(first.symbol, Some(("dispatch_loop", 0x10)));
        assert_eq!(trace.iter().nth(2).unwrap().symbol, Some(("run_monitor", 0x50)));
    }

    #[test]
    fn test_walk_stops_at_unreadable_word() {
        let rig = EngineRig::new(1);
        let mut frame = InterruptFrame::kernel(0x1010, 0x8F00);
        frame.regs.rbp = 0xDEAD_0000;
        assert_eq!(rig.engine.walk_stack(&frame, None).len(), 1);
    }

    #[test]
    fn test_walk_is_bounded() {
        let rig = EngineRig::new(1);
        for i in 0..64u64 {
            let fp = 0x10_0000 + i * 0x100;
            rig.cpu.set_stack_word(fp, fp + 0x100);
            rig.cpu.set_stack_word(fp + 8, 0x4000 + i);
        }
        let mut frame = InterruptFrame::kernel(0x1010, 0x8F00);
        frame.regs.rbp = 0x10_0000;
        assert_eq!(rig.engine.walk_stack(&frame, None).len(), MAX_STACK_DEPTH);
    }

    #[test]
    fn test_fatal_halts_other_cores() {
        let rig = EngineRig::new(3);
        let core = rig.on_core(CoreId(1));
        core.set_active(Some(Thread::kernel(ThreadId(12)).into_ref()));
        let frame = frame_with_chain(&rig);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            rig.engine.fatal(core, &frame, format_args!("test failure"));
        }));
        assert!(result.is_err());
        assert!(rig.symbols.lookups() >= 4);
        assert_eq!(rig.broadcast.sent(), [(CoreMask(0b101), 0xC1)]);
        assert_eq!(
            rig.engine.core(CoreId(2)).peek_signal(CoreId(1)),
            Some((IciKind::HALT, 0))
        );
    }
}
