//! Tally - running averages for timed actions.
//!
//! Tally ingests events of the form `{"action": "jump", "time": 100}` and
//! keeps, per action name, a running count and sum from which the floored
//! mean is derived on demand. Stores are safe to share between threads:
//! every update is atomic and snapshots never observe a half-applied one.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;

pub use config::{Config, IngestConfig, StoreConfig, StoreKind};
pub use core::{decode, Accumulator, ActionAverage, Aggregator, Event};
pub use error::{Result, TallyError};
pub use storage::{create_store, AggregateStore, MemoryStore, ShardedStore};

// CLI commands
pub use cli::IngestCommand;
