//! Aggregate storage traits for Tally.
//!
//! This module defines the `AggregateStore` trait that every accumulator
//! store implements.

use std::sync::Arc;

use crate::core::{Accumulator, ActionAverage, Event};
use crate::error::Result;

/// Trait for concurrent aggregate stores.
///
/// Implementations map action names to [`Accumulator`]s and must be safe to
/// share between threads. Every `record` is atomic with respect to every
/// other `record` and `snapshot`: no observer ever sees a count without its
/// matching sum.
pub trait AggregateStore: Send + Sync {
    /// Fold one event into its action's accumulator.
    ///
    /// Creates the accumulator on first sight of the action. Fails with
    /// `TallyError::Overflow` when the running total would leave the u64
    /// range, in which case the accumulator is left exactly as it was.
    fn record(&self, event: Event) -> Result<()>;

    /// Read the floored average of every action.
    ///
    /// Every entry reflects only completed `record` calls. Order is
    /// unspecified. An empty store yields an empty list.
    fn snapshot(&self) -> Result<Vec<ActionAverage>>;

    /// Retrieve a copy of one action's accumulator.
    ///
    /// Returns `Ok(None)` if the action has never been recorded.
    fn get(&self, action: &str) -> Result<Option<Accumulator>>;

    /// Number of distinct actions seen.
    fn len(&self) -> Result<usize>;

    /// Check if no action has been recorded yet.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Blanket implementation of AggregateStore for Arc-wrapped stores.
///
/// This allows sharing one store between an aggregator and the threads
/// feeding it.
impl<T: AggregateStore + ?Sized> AggregateStore for Arc<T> {
    fn record(&self, event: Event) -> Result<()> {
        (**self).record(event)
    }

    fn snapshot(&self) -> Result<Vec<ActionAverage>> {
        (**self).snapshot()
    }

    fn get(&self, action: &str) -> Result<Option<Accumulator>> {
        (**self).get(action)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}

/// Blanket implementation of AggregateStore for boxed stores.
///
/// Lets the store kind be picked from configuration at runtime.
impl<T: AggregateStore + ?Sized> AggregateStore for Box<T> {
    fn record(&self, event: Event) -> Result<()> {
        (**self).record(event)
    }

    fn snapshot(&self) -> Result<Vec<ActionAverage>> {
        (**self).snapshot()
    }

    fn get(&self, action: &str) -> Result<Option<Accumulator>> {
        (**self).get(action)
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }
}
