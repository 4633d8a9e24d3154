//! Eviction policy: direction-biased LRU.
//!
//! Candidates are ranked by:
//! - Eviction pool (entries behind the navigation direction first, then
//!   neutral, then entries ahead)
//! - Access tick within a pool (least recently used first)
//!
//! Access ticks are unique, so equal recency cannot occur and entries that
//! were never touched leave in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use crate::cache::entry::{CacheEntry, NavigationDirection};
use crate::decode::ImagePath;

/// An eviction candidate with its ranking key.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub path: ImagePath,
    pub pool: u8,
    pub access_tick: u64,
    pub size: usize,
}

// Greater = evicted first: lower pool, then older tick.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .pool
            .cmp(&self.pool)
            .then_with(|| other.access_tick.cmp(&self.access_tick))
    }
}

/// The eviction policy engine.
#[derive(Debug, Default, Clone)]
pub struct Evictor;

impl Evictor {
    pub fn new() -> Self {
        Self
    }

    /// Select entries to drop until at least `bytes_to_free` bytes are freed.
    ///
    /// Returns candidates in eviction order. Protected paths are never
    /// selected; if the unprotected entries cannot free enough, all of them
    /// are returned.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = &'a CacheEntry>,
        direction: NavigationDirection,
        bytes_to_free: usize,
        protected: &[&Path],
    ) -> Vec<EvictionCandidate> {
        if bytes_to_free == 0 {
            return Vec::new();
        }

        let mut heap = BinaryHeap::new();
        for entry in entries {
            if protected.iter().any(|p| *p == &*entry.path) {
                continue;
            }
            heap.push(EvictionCandidate {
                path: entry.path.clone(),
                pool: entry.direction.eviction_pool(direction),
                access_tick: entry.access_tick,
                size: entry.size,
            });
        }

        let mut victims = Vec::new();
        let mut freed = 0usize;
        while freed < bytes_to_free {
            match heap.pop() {
                Some(candidate) => {
                    freed += candidate.size;
                    victims.push(candidate);
                }
                None => break,
            }
        }

        victims
    }
}
