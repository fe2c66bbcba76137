//! Aggregate storage for Tally.
//!
//! This module provides the concurrent accumulator stores, a single-lock
//! store and a sharded one, behind the `AggregateStore` trait.

pub mod memory;
pub mod sharded;
pub mod traits;

pub use memory::MemoryStore;
pub use sharded::ShardedStore;
pub use traits::AggregateStore;

use crate::config::{StoreConfig, StoreKind};

/// Build the store selected by configuration.
pub fn create_store(config: &StoreConfig) -> Box<dyn AggregateStore> {
    match config.kind {
        StoreKind::Memory => Box::new(MemoryStore::new()),
        StoreKind::Sharded => Box::new(ShardedStore::with_shards(config.shards)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Event;

    #[test]
    fn test_create_memory_store() {
        let store = create_store(&StoreConfig::default());
        store.record(Event::new("jump", 4)).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_create_sharded_store() {
        let config = StoreConfig {
            kind: StoreKind::Sharded,
            shards: 3,
        };
        let store = create_store(&config);
        store.record(Event::new("jump", 4)).unwrap();
        store.record(Event::new("jump", 6)).unwrap();
        assert_eq!(store.get("jump").unwrap().unwrap().average(), Some(5));
    }
}
