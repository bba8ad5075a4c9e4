//! High precision event timer.
//!
//! The main counter is the kernel's high-frequency clock and comparator 0
//! is the scheduler timer. Registers are 64 bits wide but are accessed as
//! 32-bit halves.

use alloc::sync::Arc;

use kestrel_hal::{ClockSource, MmioBus, SchedulerTimer};
use log::{debug, warn};

const REG_PERIOD: usize = 0x004;
const REG_CONFIG: usize = 0x010;
const REG_COUNTER_LOW: usize = 0x0F0;
const REG_COUNTER_HIGH: usize = 0x0F4;
const REG_TIMER0_CONFIG: usize = 0x100;
const REG_TIMER0_COMPARE_LOW: usize = 0x108;
const REG_TIMER0_COMPARE_HIGH: usize = 0x10C;

const CONFIG_ENABLE: u32 = 1 << 0;
const CONFIG_LEGACY_ROUTE: u32 = 1 << 1;

const TIMER_LEVEL: u32 = 1 << 1;
const TIMER_INT_ENABLE: u32 = 1 << 2;
const TIMER_PERIODIC: u32 = 1 << 3;
const TIMER_32BIT: u32 = 1 << 8;

const FEMTOS_PER_SECOND: u64 = 1_000_000_000_000_000;
/// Slowest counter period the hardware may report, 100 ns.
const MAX_PERIOD_FS: u32 = 0x05F5_E100;

/// Handle to the timer block at `base`.
#[derive(Clone)]
pub struct Hpet {
    mmio: Arc<dyn MmioBus>,
    base: usize,
    frequency: u64,
}

impl Hpet {
    /// Reads the counter period. Returns `None` if no usable timer block
    /// answers at `base`.
    pub fn new(mmio: Arc<dyn MmioBus>, base: usize) -> Option<Self> {
        let period = mmio.read_u32(base + REG_PERIOD);
        if period == 0 || period > MAX_PERIOD_FS {
            warn!("hpet: implausible period {} fs at {:#x}", period, base);
            return None;
        }
        Some(Self {
            mmio,
            base,
            frequency: FEMTOS_PER_SECOND / u64::from(period),
        })
    }

    fn read(&self, reg: usize) -> u32 {
        self.mmio.read_u32(self.base + reg)
    }

    fn write(&self, reg: usize, value: u32) {
        self.mmio.write_u32(self.base + reg, value);
    }

    /// Starts the main counter with comparator 0 one-shot, edge-triggered
    /// and disabled. With `legacy_route` comparator 0 drives legacy line 0.
    pub fn start(&self, legacy_route: bool) {
        let cleared = TIMER_LEVEL | TIMER_INT_ENABLE | TIMER_PERIODIC | TIMER_32BIT;
        let timer = self.read(REG_TIMER0_CONFIG) & !cleared;
        self.write(REG_TIMER0_CONFIG, timer);
        let mut config = self.read(REG_CONFIG) | CONFIG_ENABLE;
        if legacy_route {
            config |= CONFIG_LEGACY_ROUTE;
        }
        self.write(REG_CONFIG, config);
        debug!("hpet: counter at {} Hz, legacy route {}", self.frequency, legacy_route);
    }
}

impl ClockSource for Hpet {
    fn counter(&self) -> u64 {
        // Re-read if the low half wrapped between the two reads.
        loop {
            let high = self.read(REG_COUNTER_HIGH);
            let low = self.read(REG_COUNTER_LOW);
            if self.read(REG_COUNTER_HIGH) == high {
                return (u64::from(high) << 32) | u64::from(low);
            }
        }
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }
}

impl SchedulerTimer for Hpet {
    fn disable(&self) {
        let config = self.read(REG_TIMER0_CONFIG);
        self.write(REG_TIMER0_CONFIG, config & !TIMER_INT_ENABLE);
    }

    fn set_compare(&self, value: u64) {
        self.write(REG_TIMER0_COMPARE_LOW, value as u32);
        self.write(REG_TIMER0_COMPARE_HIGH, (value >> 32) as u32);
    }

    fn enable(&self) {
        let config = self.read(REG_TIMER0_CONFIG);
        self.write(REG_TIMER0_CONFIG, config | TIMER_INT_ENABLE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockMmio;

    const BASE: usize = 0xFED0_0000;

    fn hpet(period: u32) -> (MockMmio, Option<Hpet>) {
        let mmio = MockMmio::default();
        mmio.preset(BASE + REG_PERIOD, period);
        (mmio.clone(), Hpet::new(Arc::new(mmio), BASE))
    }

    #[test]
    fn test_frequency_from_period() {
        // QEMU reports 10 ns.
        let (_, hpet) = hpet(10_000_000);
        assert_eq!(hpet.unwrap().frequency(), 100_000_000);
    }

    #[test]
    fn test_rejects_missing_block() {
        assert!(hpet(0).1.is_none());
        assert!(hpet(MAX_PERIOD_FS + 1).1.is_none());
    }

    #[test]
    fn test_counter_joins_halves() {
        let (mmio, hpet) = hpet(10_000_000);
        mmio.preset(BASE + REG_COUNTER_HIGH, 0x2);
        mmio.preset(BASE + REG_COUNTER_LOW, 0x8000_0001);
        assert_eq!(hpet.unwrap().counter(), 0x2_8000_0001);
    }

    #[test]
    fn test_start_clears_periodic_and_sets_legacy_route() {
        let (mmio, hpet) = hpet(10_000_000);
        mmio.preset(BASE + REG_TIMER0_CONFIG, TIMER_PERIODIC | TIMER_INT_ENABLE | (1 << 4));
        hpet.unwrap().start(true);
        assert_eq!(mmio.value(BASE + REG_TIMER0_CONFIG), 1 << 4);
        assert_eq!(mmio.value(BASE + REG_CONFIG), CONFIG_ENABLE | CONFIG_LEGACY_ROUTE);
    }

    #[test]
    fn test_comparator_sequence() {
        let (mmio, hpet) = hpet(10_000_000);
        let hpet = hpet.unwrap();
        mmio.clear_writes();
        hpet.disable();
        hpet.set_compare(0x1_0000_0010);
        hpet.enable();
        assert_eq!(
            mmio.writes(),
            [
                (BASE + REG_TIMER0_CONFIG, 0),
                (BASE + REG_TIMER0_COMPARE_LOW, 0x10),
                (BASE + REG_TIMER0_COMPARE_HIGH, 0x1),
                (BASE + REG_TIMER0_CONFIG, TIMER_INT_ENABLE)
            ]
        );
    }
}
