//! Abstract device interrupt lines and their electrical configuration.

use core::fmt;

/// Platform-independent identifier of one interrupt source.
///
/// Lines below [`IrqLine::LOCAL_BASE`] are shared, system-wide lines routed
/// through the legacy cascade or the redirection-table controllers. Lines at
/// or above it are the per-core local sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrqLine(pub u16);

impl IrqLine {
    /// The primary global (scheduler) timer line.
    pub const SCHEDULER_TIMER: IrqLine = IrqLine(0);
    /// First per-core local line.
    pub const LOCAL_BASE: u16 = 0x100;
    /// Per-core local timer.
    pub const LOCAL_TIMER: IrqLine = IrqLine(Self::LOCAL_BASE);
    /// Local controller error.
    pub const LOCAL_ERROR: IrqLine = IrqLine(Self::LOCAL_BASE + 1);
    /// Performance counter overflow.
    pub const LOCAL_PERF: IrqLine = IrqLine(Self::LOCAL_BASE + 2);
    /// Thermal sensor.
    pub const LOCAL_THERMAL: IrqLine = IrqLine(Self::LOCAL_BASE + 3);
    /// Number of local lines.
    pub const LOCAL_COUNT: u16 = 4;

    /// Returns `true` for the per-core local lines.
    pub const fn is_local(self) -> bool {
        self.0 >= Self::LOCAL_BASE
    }

    /// Offset of a local line from [`IrqLine::LOCAL_BASE`].
    pub const fn local_index(self) -> Option<u16> {
        if self.is_local() && self.0 - Self::LOCAL_BASE < Self::LOCAL_COUNT {
            Some(self.0 - Self::LOCAL_BASE)
        } else {
            None
        }
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IrqLine::LOCAL_TIMER => write!(f, "local-timer"),
            IrqLine::LOCAL_ERROR => write!(f, "local-error"),
            IrqLine::LOCAL_PERF => write!(f, "local-perf"),
            IrqLine::LOCAL_THERMAL => write!(f, "local-thermal"),
            IrqLine(n) => write!(f, "irq{}", n),
        }
    }
}

/// Signal polarity of a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Polarity {
    /// Asserted when high.
    #[default]
    ActiveHigh,
    /// Asserted when low.
    ActiveLow,
}

/// Trigger mode of a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Trigger {
    /// Fires on the signal edge.
    #[default]
    Edge,
    /// Fires while the signal is asserted.
    Level,
}

/// Caller-supplied configuration for a line, used when the platform override
/// map has no entry for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrqConfig {
    /// Signal polarity.
    pub polarity: Polarity,
    /// Trigger mode.
    pub trigger: Trigger,
    /// Core the line is delivered to.
    pub target: crate::CoreId,
}

/// Platform override for one source line, as reported by firmware.
///
/// Redirects a bus-relative source line to a different global line and may
/// force its polarity or trigger mode. A `None` field means "use the
/// caller's configuration".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrqOverride {
    /// Line as drivers name it.
    pub source: IrqLine,
    /// Global controller input it is wired to.
    pub global_line: u32,
    /// Forced polarity.
    pub polarity: Option<Polarity>,
    /// Forced trigger mode.
    pub trigger: Option<Trigger>,
}
