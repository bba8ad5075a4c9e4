//! Legacy cascaded 8259 pair.
//!
//! Sixteen inputs across two chips, the slave cascaded into master input 2.
//! Vector offsets are fixed when the pair is initialised, so `configure`
//! only programs the edge/level control register and masks the input.

use alloc::boxed::Box;

use kestrel_common::{CoreId, Polarity, Trigger};
use kestrel_hal::{InterruptController, PortBus, Route};
use log::{trace, warn};

const MASTER_COMMAND: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_COMMAND: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;
/// Edge/level control registers, one bit per input.
const ELCR_MASTER: u16 = 0x4D0;
const ELCR_SLAVE: u16 = 0x4D1;

/// Master input the slave is wired to.
pub const CASCADE_BIT: u8 = 2;
const SPECIFIC_EOI: u8 = 0x60;
const INPUTS: u32 = 16;

/// The cascaded pair, driven through port I/O.
pub struct LegacyPic {
    ports: Box<dyn PortBus>,
}

impl LegacyPic {
    /// Wraps the port bus. The pair must already be initialised with its
    /// vector offsets.
    pub fn new(ports: Box<dyn PortBus>) -> Self {
        Self { ports }
    }

    fn data_port(bit: u8) -> (u16, u8) {
        if bit < 8 {
            (MASTER_DATA, bit)
        } else {
            (SLAVE_DATA, bit - 8)
        }
    }

    fn update(&self, port: u16, bit: u8, set: bool) {
        let value = self.ports.read_u8(port);
        let value = if set { value | (1 << bit) } else { value & !(1 << bit) };
        self.ports.write_u8(port, value);
    }

    fn bit(route: Route) -> Option<u8> {
        match route {
            Route::Legacy { bit } => Some(bit),
            Route::Redirection { .. } => None,
        }
    }
}

impl InterruptController for LegacyPic {
    fn name(&self) -> &'static str {
        "8259"
    }

    fn route(&self, global_line: u32) -> Option<Route> {
        if global_line >= INPUTS || global_line == u32::from(CASCADE_BIT) {
            return None;
        }
        Some(Route::Legacy {
            bit: global_line as u8,
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
        let Some(bit) = Self::bit(route) else { return };
        if polarity == Polarity::ActiveLow {
            warn!("8259: input {} cannot be active-low, using active-high", bit);
        }
        if target != CoreId(0) {
            warn!("8259: input {} always delivers to core0, not {}", bit, target);
        }
        let (port, local) = Self::data_port(bit);
        self.update(port, local, true);
        let elcr = if bit < 8 { ELCR_MASTER } else { ELCR_SLAVE };
        self.update(elcr, local, trigger == Trigger::Level);
        trace!("8259: input {} -> vector {:#x}, {:?}", bit, vector, trigger);
    }

    fn mask(&self, route: Route) {
        if let Some(bit) = Self::bit(route) {
            let (port, local) = Self::data_port(bit);
            self.update(port, local, true);
        }
    }

    fn unmask(&self, route: Route) {
        let Some(bit) = Self::bit(route) else { return };
        let (port, local) = Self::data_port(bit);
        self.update(port, local, false);
        if bit >= 8 {
            self.update(MASTER_DATA, CASCADE_BIT, false);
        }
    }

    fn acknowledge(&self, route: Route) {
        let Some(bit) = Self::bit(route) else { return };
        if bit >= 8 {
            self.ports.write_u8(SLAVE_COMMAND, SPECIFIC_EOI | (bit - 8));
            self.ports.write_u8(MASTER_COMMAND, SPECIFIC_EOI | CASCADE_BIT);
        } else {
            self.ports.write_u8(MASTER_COMMAND, SPECIFIC_EOI | bit);
        }
    }
}
