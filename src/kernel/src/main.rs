//! Kestrel kernel entry point.
//!
//! Brings up the boot core's interrupt hardware, installs the engine and
//! launches the monitor. The monitor here is a minimal stand-in for the
//! scheduler: it logs every event and keeps resuming one kernel thread.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate alloc;

#[cfg(target_os = "none")]
mod kernel {
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec;
    use core::arch::asm;
    use core::panic::PanicInfo;
    use core::sync::atomic::{AtomicU64, Ordering};

    use bootloader::{entry_point, BootInfo};
    use kestrel_common::{CoreId, IciKind, IrqConfig, IrqLine, ProcessId, ThreadId};
    use kestrel_kernel::arch::x86_64::cpu::kernel_thread_frame;
    use kestrel_kernel::arch::x86_64::{self as arch, memory, platform, trap};
    use kestrel_kernel::cpu::CpuCore;
    use kestrel_kernel::serial_println;
    use kestrel_kernel::services::{
        AddressSpace, DeviceIrqHandler, IciConsumer, NoSymbols, Services, SyscallDispatcher,
    };
    use kestrel_kernel::thread::{FramePtr, SavedContext, Thread, ThreadRef};
    use log::{debug, info, LevelFilter};
    use x86_64::VirtAddr;

    entry_point!(kernel_main);

    const WORKER_STACK_SIZE: usize = 16 * 1024;
    /// Scheduler tick period.
    const TICK_MS: u64 = 100;
    /// Worker quantum.
    const QUANTUM_MS: u64 = 10;

    static WORKER: spin::Once<ThreadRef> = spin::Once::new();
    static WORK_DONE: AtomicU64 = AtomicU64::new(0);

    struct LoggingSyscalls;

    impl SyscallDispatcher for LoggingSyscalls {
        fn on_system_call(&self, core: &CpuCore, thread: &ThreadRef, result: &mut u64) {
            let mut t = thread.lock();
            debug!("syscall {} from {} on {}", t.syscall.id, t.id(), core.id());
            *result = u64::MAX;
            t.syscall.in_flight = false;
        }
    }

    struct LoggingSignals;

    impl IciConsumer for LoggingSignals {
        fn on_inter_core_signal(
            &self,
            core: &CpuCore,
            _thread: Option<&ThreadRef>,
            source: CoreId,
            kind: IciKind,
            arg: usize,
        ) {
            debug!("signal {}({}) from {} on {}", kind, arg, source, core.id());
        }
    }

    struct KernelOnly;

    impl AddressSpace for KernelOnly {
        fn mapped_process(&self, _core: CoreId) -> Option<ProcessId> {
            None
        }
    }

    /// Owns the scheduler line; the engine services it before any handler.
    struct SchedulerTick;

    impl DeviceIrqHandler for SchedulerTick {
        fn on_irq(&self, _core: &CpuCore) {}
    }

    /// Divides by zero under a trap to show kernel faults landing back in
    /// the thread.
    fn trap_self_check() {
        let Some(engine) = kestrel_kernel::engine() else {
            return;
        };
        let outcome = trap::guarded(engine, || {
            // SAFETY: only scratch registers are touched; the fault is caught
            // by the mounted trap.
            unsafe {
                asm!(
                    "xor edx, edx",
                    "xor ecx, ecx",
                    "div rcx",
                    inout("rax") 1u64 => _,
                    out("rcx") _,
                    out("rdx") _,
                )
            }
        });
        info!("worker: guarded division by zero: {:?}", outcome);
    }

    extern "C" fn worker() -> ! {
        trap_self_check();
        loop {
            WORK_DONE.fetch_add(1, Ordering::Relaxed);
            core::hint::spin_loop();
        }
    }

    fn spawn_worker(quantum: u64) -> ThreadRef {
        let stack = vec![0u8; WORKER_STACK_SIZE].leak();
        let top = (stack.as_ptr() as usize + WORKER_STACK_SIZE) & !0xF;
        let slot = (top - core::mem::size_of::<kestrel_common::InterruptFrame>()) & !0xF;
        let frame = slot as *mut kestrel_common::InterruptFrame;
        // SAFETY: `slot` lies inside the leaked stack, is aligned and is not
        // used by anything else until the thread first runs.
        let frame = unsafe {
            frame.write(kernel_thread_frame(worker, top as u64));
            &mut *frame
        };
        let mut thread = Thread::kernel(ThreadId(1));
        thread.saved = SavedContext::KernelFrame(FramePtr::new(frame));
        thread.quantum_ticks = quantum;
        thread.into_ref()
    }

    extern "C" fn monitor(core: usize) -> ! {
        let Some(engine) = kestrel_kernel::engine() else {
            arch::halt_loop()
        };
        let record = engine.core(CoreId(core as u8));
        while let Some(event) = record.take_event() {
            debug!("monitor: {:?}", event);
        }
        if !engine.timers().scheduler_timer_armed() {
            info!(
                "monitor: tick at {} ms, worker progress {}",
                engine.timers().ticks_to_ms(engine.ticks()),
                WORK_DONE.load(Ordering::Relaxed)
            );
            engine.arm_scheduler_timer(Some(engine.timers().frequency() * TICK_MS / 1000));
        }
        match WORKER.get() {
            Some(thread) => {
                thread.lock().quantum_ticks = engine.timers().frequency() * QUANTUM_MS / 1000;
                engine.resume_thread(thread.clone())
            }
            None => engine.idle(),
        }
    }

    fn kernel_main(boot_info: &'static BootInfo) -> ! {
        arch::serial::init_logger(LevelFilter::Info);
        platform::init_cpu();

        let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset);
        // SAFETY: the bootloader maps all physical memory at the offset and
        // this is the only mapper.
        let mut mapper = unsafe { memory::init_mapper(phys_mem_offset) };
        // SAFETY: the bootloader's usable regions are unused.
        let mut frame_allocator =
            unsafe { memory::BootInfoFrameAllocator::init(&boot_info.memory_map) };
        if let Err(err) = kestrel_kernel::allocator::init_heap(&mut mapper, &mut frame_allocator) {
            panic!("heap initialization failed: {:?}", err);
        }
        info!("kernel: heap ready");

        let services = Services {
            syscalls: Box::new(LoggingSyscalls),
            signals: Box::new(LoggingSignals),
            address_space: Box::new(KernelOnly),
            symbols: Box::new(NoSymbols),
            monitor,
        };
        let engine = kestrel_kernel::install(platform::bring_up(phys_mem_offset, services));
        engine.start();

        let tick: Arc<dyn DeviceIrqHandler> = Arc::new(SchedulerTick);
        let routed = engine
            .install_handler(IrqLine::SCHEDULER_TIMER, tick, IrqConfig::default())
            .and_then(|()| engine.set_mask(IrqLine::SCHEDULER_TIMER, false));
        if let Err(err) = routed {
            panic!("scheduler line: {}", err);
        }

        let quantum = engine.timers().frequency() * QUANTUM_MS / 1000;
        WORKER.call_once(|| spawn_worker(quantum));
        info!("kernel: launching monitor");
        engine.launch(engine.current_core().id())
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        serial_println!("KERNEL PANIC: {}", info);
        arch::halt_loop()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
