//! Redirection-table interrupt controllers.
//!
//! Each controller exposes an index/data register pair and a table of
//! 64-bit redirection entries, one per input. Global line numbers are split
//! across controllers by each one's base. End of interrupt goes to the
//! receiving core's local controller.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use kestrel_common::{CoreId, Polarity, Trigger};
use kestrel_hal::{InterruptController, LocalInterruptController, MmioBus, Route};
use log::debug;

const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;
const REG_VERSION: u32 = 0x01;
const REDIRECTION_BASE: u32 = 0x10;

const ENTRY_ACTIVE_LOW: u32 = 1 << 13;
const ENTRY_LEVEL: u32 = 1 << 15;
const ENTRY_MASKED: u32 = 1 << 16;
const DESTINATION_SHIFT: u32 = 24;

/// One controller found by platform discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoApicInfo {
    /// Register window base address.
    pub base: usize,
    /// First global line the controller serves.
    pub line_base: u32,
}

#[derive(Debug, Clone, Copy)]
struct Controller {
    base: usize,
    line_base: u32,
    entries: u32,
}

/// All redirection-table controllers of the platform.
pub struct IoApicSet {
    mmio: Box<dyn MmioBus>,
    local: Arc<dyn LocalInterruptController>,
    controllers: Vec<Controller>,
}

impl IoApicSet {
    /// Reads each controller's entry count and masks every input.
    pub fn new(
        mmio: Box<dyn MmioBus>,
        local: Arc<dyn LocalInterruptController>,
        found: &[IoApicInfo],
    ) -> Self {
        let mut set = Self {
            mmio,
            local,
            controllers: Vec::with_capacity(found.len()),
        };
        for info in found {
            let version = set.read(info.base, REG_VERSION);
            let entries = ((version >> 16) & 0xFF) + 1;
            let controller = Controller {
                base: info.base,
                line_base: info.line_base,
                entries,
            };
            for offset in 0..entries {
                set.write(info.base, REDIRECTION_BASE + 2 * offset, ENTRY_MASKED);
            }
            debug!(
                "ioapic: {:#x} serves lines {}..{}",
                info.base,
                info.line_base,
                info.line_base + entries
            );
            set.controllers.push(controller);
        }
        set
    }

    fn read(&self, base: usize, reg: u32) -> u32 {
        self.mmio.write_u32(base + IOREGSEL, reg);
        self.mmio.read_u32(base + IOWIN)
    }

    fn write(&self, base: usize, reg: u32, value: u32) {
        self.mmio.write_u32(base + IOREGSEL, reg);
        self.mmio.write_u32(base + IOWIN, value);
    }

    fn entry(&self, route: Route) -> Option<(usize, u32)> {
        let Route::Redirection { controller, offset } = route else {
            return None;
        };
        let controller = self.controllers.get(usize::from(controller))?;
        Some((controller.base, REDIRECTION_BASE + 2 * u32::from(offset)))
    }

    fn update_low(&self, route: Route, set: u32, clear: u32) {
        if let Some((base, reg)) = self.entry(route) {
            let low = self.read(base, reg);
            self.write(base, reg, (low & !clear) | set);
        }
    }
}

impl InterruptController for IoApicSet {
    fn name(&self) -> &'static str {
        "ioapic"
    }

    fn route(&self, global_line: u32) -> Option<Route> {
        self.controllers.iter().enumerate().find_map(|(index, c)| {
            let offset = global_line.checked_sub(c.line_base)?;
            (offset < c.entries).then(|| Route::Redirection {
                controller: index as u8,
                offset: offset as u8,
            })
        })
    }

    fn configure(
        &self,
        route: Route,
        vector: u8,
        polarity: Polarity,
        trigger: Trigger,
        target: CoreId,
    ) {
        let Some((base, reg)) = self.entry(route) else { return };
        let mut low = u32::from(vector) | ENTRY_MASKED;
        if polarity == Polarity::ActiveLow {
            low |= ENTRY_ACTIVE_LOW;
        }
        if trigger == Trigger::Level {
            low |= ENTRY_LEVEL;
        }
        // Destination first so the entry is never live with a stale target.
        self.write(base, reg + 1, u32::from(target.0) << DESTINATION_SHIFT);
        self.write(base, reg, low);
    }

    fn mask(&self, route: Route) {
        self.update_low(route, ENTRY_MASKED, 0);
    }

    fn unmask(&self, route: Route) {
        self.update_low(route, 0, ENTRY_MASKED);
    }

    fn acknowledge(&self, _route: Route) {
        self.local.end_of_interrupt();
    }
}
