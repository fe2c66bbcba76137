//! Single-lock in-memory aggregate store.
//!
//! One `RwLock<HashMap>` guards both the map and every accumulator in it.
//! Records take the write lock; snapshots take the read lock, so any
//! number of snapshots can run side by side.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::core::{Accumulator, ActionAverage, Event};
use crate::error::{Result, TallyError};
use crate::storage::AggregateStore;

/// Coarse-grained aggregate store.
///
/// Accumulators live for as long as the store does; there is no eviction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Accumulators by action name.
    accumulators: RwLock<HashMap<String, Accumulator>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            accumulators: RwLock::new(HashMap::new()),
        }
    }
}

/// Map a poisoned lock to an aggregation fault.
fn poisoned<T>(_: PoisonError<T>) -> TallyError {
    TallyError::aggregation("store lock poisoned by a panicking writer")
}

/// Fold one more sample into an existing accumulator.
///
/// Shared by every store; the caller holds the lock guarding `acc`. On
/// overflow `acc` is left untouched.
pub(crate) fn fold_into(acc: &mut Accumulator, action: &str, amount: u64) -> Result<()> {
    let updated = acc.checked_add(amount).ok_or_else(|| {
        tracing::debug!(
            action,
            amount,
            current_sum = acc.sum(),
            "rejecting sample that would overflow running total"
        );
        TallyError::overflow(action, amount, acc.sum())
    })?;
    *acc = updated;
    Ok(())
}

impl AggregateStore for MemoryStore {
    fn record(&self, event: Event) -> Result<()> {
        let (action, amount) = event.into_parts();
        let mut accumulators = self.accumulators.write().map_err(poisoned)?;
        match accumulators.get_mut(&action) {
            Some(acc) => fold_into(acc, &action, amount),
            None => {
                tracing::debug!(action = %action, amount, "new action");
                accumulators.insert(action, Accumulator::new(amount));
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> Result<Vec<ActionAverage>> {
        let accumulators = self.accumulators.read().map_err(poisoned)?;
        tracing::trace!(actions = accumulators.len(), "taking snapshot");
        accumulators
            .iter()
            .map(|(action, acc)| ActionAverage::from_accumulator(action, acc))
            .collect()
    }

    fn get(&self, action: &str) -> Result<Option<Accumulator>> {
        let accumulators = self.accumulators.read().map_err(poisoned)?;
        Ok(accumulators.get(action).copied())
    }

    fn len(&self) -> Result<usize> {
        let accumulators = self.accumulators.read().map_err(poisoned)?;
        Ok(accumulators.len())
    }
}
