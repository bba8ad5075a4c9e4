//! Boot-time configuration of the interrupt layer.
//!
//! Built once per boot from platform discovery and never changed afterwards.

use alloc::vec::Vec;

use kestrel_common::{CoreId, IrqLine, IrqOverride, MAX_CORES};

/// Vectors below this are processor exceptions.
pub const DEVICE_VECTOR_BASE: u8 = 32;
/// Fast system-call trap vector.
pub const SYSCALL_VECTOR: u8 = 0x80;
/// First vector of the reserved inter-core range.
pub const ICI_VECTOR_BASE: u8 = 0xC0;
/// First vector of the local-line range.
pub const LOCAL_VECTOR_BASE: u8 = 0xE0;
/// Spurious vector of the local controller.
pub const SPURIOUS_VECTOR: u8 = 0xFF;
/// Shared lines exposed by the redirection-table controllers.
pub const DEFAULT_SHARED_LINES: u16 = 24;

/// What a vector means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorClass {
    /// Processor exception `n`.
    Exception(u8),
    /// System-call trap.
    SystemCall,
    /// Inter-core signal posted by the given source core.
    InterCore(CoreId),
    /// Device line, shared or local.
    Device(IrqLine),
    /// The local controller's spurious vector.
    Spurious,
    /// A device-class vector no line maps to.
    Unrouted,
}

/// Assignment of vector numbers to interrupt classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLayout {
    /// Vectors below this are exceptions.
    pub device_base: u8,
    /// Number of shared lines starting at `device_base`.
    pub shared_lines: u16,
    /// System-call trap vector.
    pub syscall: u8,
    /// First inter-core vector; the range is [`MAX_CORES`] wide.
    pub ici_base: u8,
    /// First local-line vector.
    pub local_base: u8,
    /// Spurious vector.
    pub spurious: u8,
}

impl Default for VectorLayout {
    fn default() -> Self {
        Self {
            device_base: DEVICE_VECTOR_BASE,
            shared_lines: DEFAULT_SHARED_LINES,
            syscall: SYSCALL_VECTOR,
            ici_base: ICI_VECTOR_BASE,
            local_base: LOCAL_VECTOR_BASE,
            spurious: SPURIOUS_VECTOR,
        }
    }
}

impl VectorLayout {
    /// Classifies `vector`.
    pub fn classify(&self, vector: u8) -> VectorClass {
        if vector < self.device_base {
            return VectorClass::Exception(vector);
        }
        if vector == self.syscall {
            return VectorClass::SystemCall;
        }
        if vector >= self.ici_base && usize::from(vector - self.ici_base) < MAX_CORES {
            return VectorClass::InterCore(CoreId(vector - self.ici_base));
        }
        if vector == self.spurious {
            return VectorClass::Spurious;
        }
        match self.line_for_vector(vector) {
            Some(line) => VectorClass::Device(line),
            None => VectorClass::Unrouted,
        }
    }

    /// Translates a device vector back to its line.
    pub fn line_for_vector(&self, vector: u8) -> Option<IrqLine> {
        if vector >= self.local_base {
            let index = u16::from(vector - self.local_base);
            return (index < IrqLine::LOCAL_COUNT).then(|| IrqLine(IrqLine::LOCAL_BASE + index));
        }
        if vector >= self.device_base {
            let line = u16::from(vector - self.device_base);
            return (line < self.shared_lines).then_some(IrqLine(line));
        }
        None
    }

    /// Vector a line is delivered on.
    pub fn vector_for_line(&self, line: IrqLine) -> Option<u8> {
        if let Some(index) = line.local_index() {
            return u8::try_from(u16::from(self.local_base) + index).ok();
        }
        if line.0 < self.shared_lines {
            return u8::try_from(u16::from(self.device_base) + line.0).ok();
        }
        None
    }

    /// Vector that carries signals posted by `source`.
    pub fn ici_vector(&self, source: CoreId) -> u8 {
        self.ici_base + source.0
    }
}

/// Complete configuration handed to [`crate::InterruptEngine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of cores brought up.
    pub core_count: usize,
    /// Vector assignment.
    pub vectors: VectorLayout,
    /// Firmware override map for shared lines.
    pub overrides: Vec<IrqOverride>,
    /// Top of each core's monitor stack, indexed by core.
    pub monitor_stacks: Vec<usize>,
}

impl EngineConfig {
    /// Configuration for `core_count` cores with the default vector layout.
    ///
    /// # Panics
    ///
    /// Panics if `core_count` is zero or exceeds [`MAX_CORES`].
    pub fn new(core_count: usize) -> Self {
        assert!(
            (1..=MAX_CORES).contains(&core_count),
            "core count {} out of range",
            core_count
        );
        Self {
            core_count,
            vectors: VectorLayout::default(),
            overrides: Vec::new(),
            monitor_stacks: alloc::vec![0; core_count],
        }
    }

    /// Replaces the vector layout.
    pub fn with_vectors(mut self, vectors: VectorLayout) -> Self {
        self.vectors = vectors;
        self
    }

    /// Adds a firmware override.
    pub fn with_override(mut self, entry: IrqOverride) -> Self {
        self.overrides.push(entry);
        self
    }

    /// Sets the monitor stack top of `core`.
    pub fn with_monitor_stack(mut self, core: CoreId, top: usize) -> Self {
        self.monitor_stacks[core.index()] = top;
        self
    }
}
