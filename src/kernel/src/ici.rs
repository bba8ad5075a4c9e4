//! Inter-core signal channel.
//!
//! Each core has one mailbox per possible source core. Sending writes the
//! source's mailbox in every target that has it free, then raises the
//! source's reserved vector on exactly those targets. Delivery is lossy:
//! a second signal from the same source before the first is consumed is
//! dropped, and callers get back the set of targets that took a fresh one.

use alloc::boxed::Box;
use core::sync::atomic::{fence, Ordering};

use kestrel_common::{CoreId, CoreMask, IciKind};
use kestrel_hal::IpiBroadcast;
use log::{trace, warn};

use crate::config::VectorLayout;
use crate::cpu::{CoreArena, CpuCore};

/// Sender and receiver sides of inter-core signalling.
pub struct IciChannel {
    broadcast: Box<dyn IpiBroadcast>,
    vectors: VectorLayout,
}

impl IciChannel {
    /// Wraps the broadcast hardware.
    pub fn new(broadcast: Box<dyn IpiBroadcast>, vectors: VectorLayout) -> Self {
        Self { broadcast, vectors }
    }

    /// Posts `(kind, arg)` from `source` to every core in `targets` whose
    /// mailbox for `source` is empty, and interrupts those cores.
    ///
    /// Returns the cores that received a fresh signal. Returns the empty set
    /// if the broadcast hardware is still busy; mailboxes written before
    /// that check stay populated and are picked up by the next interrupt of
    /// that source's vector.
    ///
    /// # Panics
    ///
    /// Panics if `targets` contains `source`.
    pub fn send(
        &self,
        cores: &CoreArena,
        source: CoreId,
        targets: CoreMask,
        kind: IciKind,
        arg: usize,
    ) -> CoreMask {
        assert!(
            !targets.contains(source),
            "{} sent an inter-core signal to itself",
            source
        );

        let mut sent = CoreMask::EMPTY;
        for target in targets.iter().filter(|t| t.index() < cores.len()) {
            if cores.remote(target).post(source, kind, arg) {
                sent.insert(target);
            } else {
                trace!("ici: {} -> {} {} dropped, mailbox full", source, target, kind);
            }
        }
        if sent.is_empty() {
            return sent;
        }

        fence(Ordering::SeqCst);
        if self.broadcast.busy() {
            warn!("ici: broadcast busy, {} abandoned send of {}", source, kind);
            return CoreMask::EMPTY;
        }
        self.broadcast.send(sent, self.vectors.ici_vector(source));
        sent
    }

    /// Empties `core`'s mailbox for `source`.
    pub fn receive(&self, core: &CpuCore, source: CoreId) -> Option<(IciKind, usize)> {
        core.take_signal(source)
    }
}
