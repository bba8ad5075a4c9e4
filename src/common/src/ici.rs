//! Inter-core signal tags.

use core::fmt;
use core::num::NonZeroU32;

/// Tag of an inter-core signal.
///
/// Zero is reserved to mean "empty mailbox", so a tag is always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IciKind(NonZeroU32);

impl IciKind {
    /// Ask the target to re-evaluate its pending event list.
    pub const RESCHEDULE: IciKind = IciKind::from_raw(1);
    /// Ask the target to flush address-space mappings named by the argument.
    pub const FLUSH_MAPPINGS: IciKind = IciKind::from_raw(2);
    /// Another core hit a fatal error; stop.
    pub const HALT: IciKind = IciKind::from_raw(3);

    /// Builds a tag from its raw value.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is zero.
    pub const fn from_raw(raw: u32) -> Self {
        match NonZeroU32::new(raw) {
            Some(v) => IciKind(v),
            None => panic!("ICI kind 0 is reserved for empty slots"),
        }
    }

    /// Decodes a mailbox word; zero means the slot is empty.
    pub const fn decode(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(IciKind(v)),
            None => None,
        }
    }

    /// Raw tag value.
    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for IciKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            1 => write!(f, "reschedule"),
            2 => write!(f, "flush-mappings"),
            3 => write!(f, "halt"),
            raw => write!(f, "ici#{}", raw),
        }
    }
}
