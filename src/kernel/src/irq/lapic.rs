//! Per-core local interrupt controller.
//!
//! Every core sees its own controller at the same physical address, so one
//! [`LocalApic`] handle serves all cores: each register access lands on the
//! executing core's controller. Besides the local vector table it drives
//! the one-shot local timer and the inter-core command register.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use kestrel_common::{CoreId, CoreMask};
use kestrel_hal::{
    ClockSource, IpiBroadcast, LocalInterruptController, LocalSource, LocalTimer, MmioBus,
};
use log::{debug, trace};

const REG_ID: usize = 0x020;
const REG_EOI: usize = 0x0B0;
const REG_LOGICAL_DEST: usize = 0x0D0;
const REG_DEST_FORMAT: usize = 0x0E0;
const REG_SPURIOUS: usize = 0x0F0;
const REG_ERROR_STATUS: usize = 0x280;
const REG_ICR_LOW: usize = 0x300;
const REG_ICR_HIGH: usize = 0x310;
const REG_LVT_TIMER: usize = 0x320;
const REG_LVT_THERMAL: usize = 0x330;
const REG_LVT_PERF: usize = 0x340;
const REG_LVT_ERROR: usize = 0x370;
const REG_TIMER_INITIAL: usize = 0x380;
const REG_TIMER_CURRENT: usize = 0x390;
const REG_TIMER_DIVIDE: usize = 0x3E0;

const LVT_MASKED: u32 = 1 << 16;
const SOFTWARE_ENABLE: u32 = 1 << 8;
const FLAT_MODEL: u32 = 0xFFFF_FFFF;
const DIVIDE_BY_1: u32 = 0b1011;

const ICR_BUSY: u32 = 1 << 12;
const ICR_LOGICAL: u32 = 1 << 11;
const ICR_ASSERT: u32 = 1 << 14;
/// Flat logical mode addresses at most this many cores.
const FLAT_CORES: u32 = 8;

/// Handle to the local controller window.
#[derive(Clone)]
pub struct LocalApic {
    mmio: Arc<dyn MmioBus>,
    base: usize,
    timer_vector: u8,
    timer_hz: Arc<AtomicU64>,
}

impl LocalApic {
    /// Wraps the controller window at `base`. `timer_vector` is the vector
    /// the one-shot timer delivers on.
    pub fn new(mmio: Arc<dyn MmioBus>, base: usize, timer_vector: u8) -> Self {
        Self {
            mmio,
            base,
            timer_vector,
            timer_hz: Arc::new(AtomicU64::new(0)),
        }
    }

    fn read(&self, reg: usize) -> u32 {
        self.mmio.read_u32(self.base + reg)
    }

    fn write(&self, reg: usize, value: u32) {
        self.mmio.write_u32(self.base + reg, value);
    }

    fn lvt(source: LocalSource) -> usize {
        match source {
            LocalSource::Timer => REG_LVT_TIMER,
            LocalSource::Thermal => REG_LVT_THERMAL,
            LocalSource::Performance => REG_LVT_PERF,
            LocalSource::Error => REG_LVT_ERROR,
        }
    }

    /// Brings the executing core's controller up: flat logical addressing
    /// with one bit per core, every local source masked, software enabled.
    pub fn enable(&self, core: CoreId, spurious_vector: u8) {
        self.write(REG_DEST_FORMAT, FLAT_MODEL);
        if u32::from(core.0) < FLAT_CORES {
            self.write(REG_LOGICAL_DEST, (1 << core.0) << 24);
        }
        for source in [
            LocalSource::Timer,
            LocalSource::Thermal,
            LocalSource::Performance,
            LocalSource::Error,
        ] {
            self.mask(source);
        }
        self.write(REG_SPURIOUS, u32::from(spurious_vector) | SOFTWARE_ENABLE);
        debug!("lapic: {} enabled", core);
    }

    /// Hardware id of the executing core's controller.
    pub fn id(&self) -> u8 {
        (self.read(REG_ID) >> 24) as u8
    }

    /// Records the timer rate measured against a reference clock.
    pub fn set_timer_frequency(&self, hz: u64) {
        self.timer_hz.store(hz, Ordering::Relaxed);
    }

    /// Measures the timer rate against `clock` over at least `window`
    /// counter ticks, records it and returns it. The timer is left stopped.
    pub fn calibrate(&self, clock: &dyn ClockSource, window: u64) -> u64 {
        self.write(REG_TIMER_DIVIDE, DIVIDE_BY_1);
        self.write(REG_LVT_TIMER, u32::from(self.timer_vector) | LVT_MASKED);
        let start = clock.counter();
        self.write(REG_TIMER_INITIAL, u32::MAX);
        let mut now = clock.counter();
        while now.wrapping_sub(start) < window {
            core::hint::spin_loop();
            now = clock.counter();
        }
        let counted = u32::MAX - self.read(REG_TIMER_CURRENT);
        self.write(REG_TIMER_INITIAL, 0);

        let elapsed = now.wrapping_sub(start).max(1);
        let hz = (u128::from(counted) * u128::from(clock.frequency()) / u128::from(elapsed)) as u64;
        self.set_timer_frequency(hz);
        debug!("lapic: timer runs at {} Hz", hz);
        hz
    }
}

impl LocalInterruptController for LocalApic {
    fn configure(&self, source: LocalSource, vector: u8) {
        self.write(Self::lvt(source), u32::from(vector) | LVT_MASKED);
    }

    fn mask(&self, source: LocalSource) {
        let reg = Self::lvt(source);
        self.write(reg, self.read(reg) | LVT_MASKED);
    }

    fn unmask(&self, source: LocalSource) {
        if source == LocalSource::Error {
            // The status register latches on write; the second write clears
            // whatever the first one latched.
            self.write(REG_ERROR_STATUS, 0);
            self.write(REG_ERROR_STATUS, 0);
        }
        let reg = Self::lvt(source);
        self.write(reg, self.read(reg) & !LVT_MASKED);
    }

    fn end_of_interrupt(&self) {
        self.write(REG_EOI, 0);
    }
}

impl LocalTimer for LocalApic {
    fn frequency(&self) -> u64 {
        self.timer_hz.load(Ordering::Relaxed)
    }

    fn start(&self, core: CoreId, ticks: u64) {
        self.write(REG_TIMER_DIVIDE, DIVIDE_BY_1);
        self.write(REG_LVT_TIMER, u32::from(self.timer_vector));
        self.write(REG_TIMER_INITIAL, u32::try_from(ticks).unwrap_or(u32::MAX));
        trace!("lapic: {} timer armed for {} ticks", core, ticks);
    }

    fn stop(&self, _core: CoreId) {
        self.mask(LocalSource::Timer);
        self.write(REG_TIMER_INITIAL, 0);
    }
}

impl IpiBroadcast for LocalApic {
    fn busy(&self) -> bool {
        self.read(REG_ICR_LOW) & ICR_BUSY != 0
    }

    fn send(&self, targets: CoreMask, vector: u8) {
        if targets.0 < (1 << FLAT_CORES) {
            self.write(REG_ICR_HIGH, targets.0 << 24);
            self.write(REG_ICR_LOW, u32::from(vector) | ICR_LOGICAL | ICR_ASSERT);
            return;
        }
        for target in targets.iter() {
            while self.busy() {
                core::hint::spin_loop();
            }
            self.write(REG_ICR_HIGH, u32::from(target.0) << 24);
            self.write(REG_ICR_LOW, u32::from(vector) | ICR_ASSERT);
        }
    }
}
