//! Snapshot Publisher: a `watch` coupling between the Correlator and its
//! configured consumer. `watch` gives "latest wins" for free — a new
//! snapshot overwrites whatever the consumer hasn't read yet instead of
//! blocking the single-owner Correlator task until it drains, which a
//! depth-1 `mpsc` channel would do. The consumer owns a separate stop
//! channel, so it can always ask the Correlator to wind down without the
//! two needing any other shared state.

use tokio::sync::{mpsc, watch};

use crate::model::Snapshot;

/// Send side, held by the Correlator.
pub struct Publisher {
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Publisher {
    /// Overwrites the pending snapshot without blocking. Returns `false`
    /// once the consumer has dropped its receiver, which is the
    /// Correlator's cue to stop.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        self.snapshot_tx.send(snapshot).is_ok()
    }
}

/// Receive side, held by a consumer.
pub struct Subscription {
    pub snapshot_rx: watch::Receiver<Snapshot>,
    pub stop_tx: mpsc::Sender<()>,
}

/// Builds a connected publisher/subscription/stop-receiver triple. The
/// Correlator keeps the `Publisher` and the returned `mpsc::Receiver<()>`;
/// the consumer keeps the `Subscription`.
pub fn channel() -> (Publisher, Subscription, mpsc::Receiver<()>) {
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
    let (stop_tx, stop_rx) = mpsc::channel(1);
    (
        Publisher { snapshot_tx },
        Subscription { snapshot_rx, stop_tx },
        stop_rx,
    )
}
