//! Core identities and core sets.

use core::fmt;

/// Largest number of cores the interrupt layer is built for.
///
/// This also sizes the reserved inter-core vector range and every core's
/// mailbox array.
pub const MAX_CORES: usize = 32;

/// Index of one physical core, `0..core_count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreId(pub u8);

impl CoreId {
    /// Returns the index as a `usize` for table lookups.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the single-bit mask selecting this core.
    pub const fn mask(self) -> CoreMask {
        CoreMask(1 << self.0)
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// A set of cores, one bit per [`CoreId`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreMask(pub u32);

impl CoreMask {
    /// The empty set.
    pub const EMPTY: CoreMask = CoreMask(0);

    /// Every core below `count`.
    pub const fn all(count: usize) -> Self {
        if count >= 32 {
            CoreMask(u32::MAX)
        } else {
            CoreMask((1u32 << count) - 1)
        }
    }

    /// Returns `true` if no core is selected.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if `core` is in the set.
    pub const fn contains(self, core: CoreId) -> bool {
        self.0 & (1 << core.0) != 0
    }

    /// Adds `core` to the set.
    pub fn insert(&mut self, core: CoreId) {
        self.0 |= 1 << core.0;
    }

    /// Removes `core` from the set.
    pub fn remove(&mut self, core: CoreId) {
        self.0 &= !(1 << core.0);
    }

    /// Returns the set without `core`.
    pub const fn without(self, core: CoreId) -> Self {
        CoreMask(self.0 & !(1 << core.0))
    }

    /// Number of cores in the set.
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CoreId> {
        let mut bits = self.0;
        core::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let next = bits.trailing_zeros();
            bits &= bits - 1;
            Some(CoreId(next as u8))
        })
    }
}

impl FromIterator<CoreId> for CoreMask {
    fn from_iter<I: IntoIterator<Item = CoreId>>(iter: I) -> Self {
        let mut mask = CoreMask::EMPTY;
        for core in iter {
            mask.insert(core);
        }
        mask
    }
}
