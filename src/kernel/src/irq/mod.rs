//! Device interrupt routing table.
//!
//! Maps abstract lines to controller inputs and vectors, owns the
//! one-handler-per-line rule, and acknowledges serviced device vectors.
//! Every mutation runs under an [`IrqSpinlock`], so no handler or controller
//! call made while the table is locked may block.
//!
//! Shared lines go through whichever [`InterruptController`] family the
//! platform selected at boot (the legacy cascade in [`legacy`] or the
//! redirection-table controllers in [`ioapic`]). Local lines always go
//! through the core's [`LocalInterruptController`] ([`lapic`]).

pub mod ioapic;
pub mod lapic;
pub mod legacy;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use kestrel_common::{IrqConfig, IrqError, IrqLine, IrqOverride, Polarity, Trigger};
use kestrel_hal::{CpuControl, InterruptController, LocalInterruptController, LocalSource, Route};
use log::{debug, trace, warn};

use crate::config::VectorLayout;
use crate::services::DeviceIrqHandler;
use crate::sync::IrqSpinlock;

/// Shared handle to a registered handler.
pub type HandlerRef = Arc<dyn DeviceIrqHandler>;

/// Local source behind a local line.
pub fn local_source(line: IrqLine) -> Option<LocalSource> {
    match line {
        IrqLine::LOCAL_TIMER => Some(LocalSource::Timer),
        IrqLine::LOCAL_ERROR => Some(LocalSource::Error),
        IrqLine::LOCAL_PERF => Some(LocalSource::Performance),
        IrqLine::LOCAL_THERMAL => Some(LocalSource::Thermal),
        _ => None,
    }
}

fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

struct IrqEntry {
    handler: Option<HandlerRef>,
    masked: bool,
    route: Option<Route>,
}

impl IrqEntry {
    const fn empty() -> Self {
        Self {
            handler: None,
            masked: true,
            route: None,
        }
    }
}

struct TableState {
    entries: Vec<IrqEntry>,
    overrides: Vec<IrqOverride>,
}

impl TableState {
    /// Global line, polarity and trigger for a shared line.
    fn resolve(&self, line: IrqLine, config: &IrqConfig) -> (u32, Polarity, Trigger) {
        match self.overrides.iter().find(|o| o.source == line) {
            Some(o) => (
                o.global_line,
                o.polarity.unwrap_or(config.polarity),
                o.trigger.unwrap_or(config.trigger),
            ),
            None => (u32::from(line.0), config.polarity, config.trigger),
        }
    }
}

/// The device interrupt routing table.
pub struct IrqTable {
    shared: Box<dyn InterruptController>,
    local: Arc<dyn LocalInterruptController>,
    vectors: VectorLayout,
    state: IrqSpinlock<TableState>,
}

impl IrqTable {
    /// Builds an empty table over the controllers selected at boot.
    pub fn new(
        cpu: Arc<dyn CpuControl>,
        shared: Box<dyn InterruptController>,
        local: Arc<dyn LocalInterruptController>,
        vectors: VectorLayout,
        overrides: Vec<IrqOverride>,
    ) -> Self {
        let slots = usize::from(vectors.shared_lines) + usize::from(IrqLine::LOCAL_COUNT);
        let entries = (0..slots).map(|_| IrqEntry::empty()).collect();
        debug!(
            "irq: {} shared lines via {}, {} overrides",
            vectors.shared_lines,
            shared.name(),
            overrides.len()
        );
        Self {
            shared,
            local,
            vectors,
            state: IrqSpinlock::new(cpu, TableState { entries, overrides }),
        }
    }

    fn index(&self, line: IrqLine) -> Result<usize, IrqError> {
        match line.local_index() {
            Some(i) => Ok(usize::from(self.vectors.shared_lines) + usize::from(i)),
            None if !line.is_local() && line.0 < self.vectors.shared_lines => {
                Ok(usize::from(line.0))
            }
            None => Err(IrqError::InvalidLine),
        }
    }

    /// Registers `handler` on `line` and configures the line, leaving it
    /// masked.
    ///
    /// Fails with [`IrqError::AlreadyInstalled`] if the line has a handler;
    /// the existing registration is left in place.
    pub fn install(
        &self,
        line: IrqLine,
        handler: HandlerRef,
        config: IrqConfig,
    ) -> Result<(), IrqError> {
        let index = self.index(line)?;
        let vector = self.vectors.vector_for_line(line).ok_or(IrqError::InvalidLine)?;
        let mut state = self.state.lock();
        if state.entries[index].handler.is_some() {
            warn!("irq: {} already has a handler", line);
            return Err(IrqError::AlreadyInstalled);
        }

        let route = match local_source(line) {
            Some(source) => {
                self.local.configure(source, vector);
                None
            }
            None => {
                let (global, polarity, trigger) = state.resolve(line, &config);
                let route = self.shared.route(global).ok_or(IrqError::NoRoute)?;
                self.shared.configure(route, vector, polarity, trigger, config.target);
                Some(route)
            }
        };

        let entry = &mut state.entries[index];
        entry.handler = Some(handler);
        entry.masked = true;
        entry.route = route;
        debug!("irq: installed {} on vector {:#x} ({:?})", line, vector, route);
        Ok(())
    }

    /// Masks or unmasks a line that has a handler.
    pub fn set_mask(&self, line: IrqLine, masked: bool) -> Result<(), IrqError> {
        let index = self.index(line)?;
        let mut state = self.state.lock();
        let entry = &mut state.entries[index];
        if entry.handler.is_none() {
            warn!("irq: mask change on {} without a handler", line);
            return Err(IrqError::NotInstalled);
        }
        self.apply_mask(line, entry.route, masked);
        entry.masked = masked;
        trace!("irq: {} {}", line, if masked { "masked" } else { "unmasked" });
        Ok(())
    }

    /// Masks `line` and drops its registration, if `handler` owns it.
    pub fn remove(&self, line: IrqLine, handler: &HandlerRef) -> Result<(), IrqError> {
        let index = self.index(line)?;
        let mut state = self.state.lock();
        let entry = &mut state.entries[index];
        match &entry.handler {
            None => return Err(IrqError::NotInstalled),
            Some(current) if !same_handler(current, handler) => {
                warn!("irq: remove of {} by a handler that does not own it", line);
                return Err(IrqError::HandlerMismatch);
            }
            Some(_) => {}
        }
        self.apply_mask(line, entry.route, true);
        *entry = IrqEntry::empty();
        debug!("irq: removed handler from {}", line);
        Ok(())
    }

    fn apply_mask(&self, line: IrqLine, route: Option<Route>, masked: bool) {
        match (local_source(line), route) {
            (Some(source), _) if masked => self.local.mask(source),
            (Some(source), _) => self.local.unmask(source),
            (None, Some(route)) if masked => self.shared.mask(route),
            (None, Some(route)) => self.shared.unmask(route),
            (None, None) => {}
        }
    }

    /// Handler registered on `line`.
    pub fn handler(&self, line: IrqLine) -> Option<HandlerRef> {
        let index = self.index(line).ok()?;
        self.state.lock().entries[index].handler.clone()
    }

    /// Returns `true` if `handler` is the one registered on `line`.
    pub fn is_owned_by(&self, line: IrqLine, handler: &HandlerRef) -> bool {
        self.handler(line)
            .is_some_and(|current| same_handler(&current, handler))
    }

    /// Mask state of a registered line.
    pub fn is_masked(&self, line: IrqLine) -> Option<bool> {
        let index = self.index(line).ok()?;
        let state = self.state.lock();
        let entry = &state.entries[index];
        entry.handler.as_ref().map(|_| entry.masked)
    }

    /// Controller input a registered shared line was mapped to.
    pub fn route(&self, line: IrqLine) -> Option<Route> {
        let index = self.index(line).ok()?;
        self.state.lock().entries[index].route
    }

    /// Acknowledges a serviced device vector with the controller that
    /// delivered it.
    pub fn end_of_interrupt(&self, vector: u8) {
        let line = match self.vectors.line_for_vector(vector) {
            Some(line) if !line.is_local() => line,
            _ => {
                self.local.end_of_interrupt();
                return;
            }
        };
        let route = {
            let state = self.state.lock();
            let registered = state.entries[usize::from(line.0)].route;
            registered.or_else(|| {
                let (global, _, _) = state.resolve(line, &IrqConfig::default());
                self.shared.route(global)
            })
        };
        match route {
            Some(route) => self.shared.acknowledge(route),
            None => self.local.end_of_interrupt(),
        }
    }
}
