//! Decoded image cache.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`entry`]: CacheEntry, NavigationDirection, DirectionTag
//! - [`store`]: The bidirectional cache (budget, put/get, eviction passes)
//! - [`evictor`]: Eviction policy (direction-biased LRU)
//! - [`budget`]: Byte budget per memory pressure level

pub mod budget;
pub mod entry;
pub mod evictor;
pub mod store;

pub use budget::BudgetPolicy;
pub use entry::{CacheEntry, DirectionTag, NavigationDirection};
pub use store::{
    new_shared_cache, BidirectionalCache, CacheError, CacheStats, EvictionReport, PutOutcome,
    SharedCache,
};
