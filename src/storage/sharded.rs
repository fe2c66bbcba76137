//! Sharded in-memory aggregate store.
//!
//! Backed by a [`DashMap`]: actions are spread over independently locked
//! shards, so records for actions in different shards do not contend. A
//! record holds its shard's write guard from lookup to commit. A snapshot
//! visits one shard at a time, so each entry is consistent but records on
//! other actions may land while it runs.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::core::{Accumulator, ActionAverage, Event};
use crate::error::Result;
use crate::storage::memory::fold_into;
use crate::storage::AggregateStore;

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 16;

/// Fine-grained aggregate store.
#[derive(Debug)]
pub struct ShardedStore {
    accumulators: DashMap<String, Accumulator>,
    shards: usize,
}

impl ShardedStore {
    /// Create a store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a store with at least `count` shards.
    ///
    /// The count is rounded up to a power of two no smaller than 2.
    pub fn with_shards(count: usize) -> Self {
        let shards = count.max(2).next_power_of_two();
        Self {
            accumulators: DashMap::with_shard_amount(shards),
            shards,
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateStore for ShardedStore {
    fn record(&self, event: Event) -> Result<()> {
        let (action, amount) = event.into_parts();
        match self.accumulators.entry(action) {
            Entry::Occupied(entry) => {
                let mut guard = entry.into_ref();
                let (action, acc) = guard.pair_mut();
                fold_into(acc, action, amount)
            }
            Entry::Vacant(entry) => {
                tracing::debug!(action = %entry.key(), amount, "new action");
                entry.insert(Accumulator::new(amount));
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> Result<Vec<ActionAverage>> {
        tracing::trace!(
            actions = self.accumulators.len(),
            shards = self.shards,
            "taking snapshot"
        );
        self.accumulators
            .iter()
            .map(|entry| ActionAverage::from_accumulator(entry.key(), entry.value()))
            .collect()
    }

    fn get(&self, action: &str) -> Result<Option<Accumulator>> {
        Ok(self.accumulators.get(action).map(|entry| *entry.value()))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.accumulators.len())
    }
}
