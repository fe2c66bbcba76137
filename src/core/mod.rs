//! Core aggregation logic for Tally.
//!
//! - `event`: payload decoding
//! - `accumulator`: per-action running totals and derived averages
//! - `aggregator`: the ingest/export entry point over a store

pub mod accumulator;
pub mod aggregator;
pub mod event;

pub use accumulator::{Accumulator, ActionAverage};
pub use aggregator::Aggregator;
pub use event::{decode, Event, ACTION_KEY, AMOUNT_KEY};
