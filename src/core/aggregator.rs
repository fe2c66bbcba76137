//! The aggregation entry point.
//!
//! [`Aggregator`] owns a store and exposes the two operations a host needs:
//! [`Aggregator::ingest`] to decode and record a raw payload, and
//! [`Aggregator::export`] to read every action's average back.

use crate::core::{decode, ActionAverage};
use crate::error::{Result, TallyError};
use crate::storage::{AggregateStore, MemoryStore};

/// Running-average aggregator over an [`AggregateStore`].
///
/// The aggregator holds no state of its own, so `&Aggregator` can be
/// shared freely between threads.
#[derive(Debug, Default)]
pub struct Aggregator<S: AggregateStore = MemoryStore> {
    store: S,
}

impl Aggregator<MemoryStore> {
    /// Create an aggregator over a fresh single-lock [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: AggregateStore> Aggregator<S> {
    /// Create an aggregator over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decode `payload` and fold it into the store.
    ///
    /// Decoding happens before any lock is taken. On failure nothing is
    /// recorded.
    pub fn ingest(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        let event = decode(payload)?;
        self.store.record(event)
    }

    /// Every action with its floored average, in no particular order.
    pub fn export(&self) -> Result<Vec<ActionAverage>> {
        self.store.snapshot()
    }

    /// The export as a JSON array of `{"action": .., "avg": ..}` objects.
    pub fn export_json(&self) -> Result<String> {
        let entries = self.export()?;
        serde_json::to_string(&entries).map_err(|e| TallyError::serde(e.to_string()))
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the aggregator, returning its store.
    pub fn into_store(self) -> S {
        self.store
    }
}
