//! Single-slot snapshot cache
//!
//! Holds the most recent [`Measurement`] and nothing else. Built on
//! `tokio::sync::watch`, the same primitive the observable parameters use:
//!
//! - `publish` replaces the slot; the previous measurement is dropped once the
//!   last reader holding a clone lets go
//! - `latest` clones the current value out under a short read lock, so
//!   readers never wait on each other and the writer never waits on I/O
//! - `subscribe` hands out a receiver for callers that want to await the
//!   next publication instead of polling
//!
//! A measurement is swapped in as a whole; readers never see a partially
//! written one.

use crate::point::Measurement;
use std::sync::Arc;
use tokio::sync::watch;

/// Latest-value store shared by the acquisition worker and readers.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    tx: Arc<watch::Sender<Option<Measurement>>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    /// Empty cache.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Overwrite the slot and wake subscribers.
    pub fn publish(&self, measurement: Measurement) {
        self.tx.send_replace(Some(measurement));
    }

    /// Most recent measurement, if any was ever published (and not cleared).
    pub fn latest(&self) -> Option<Measurement> {
        self.tx.borrow().clone()
    }

    /// Empty the slot. Used when the owning client closes.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Receiver that is notified on every publish or clear.
    pub fn subscribe(&self) -> watch::Receiver<Option<Measurement>> {
        self.tx.subscribe()
    }
}
