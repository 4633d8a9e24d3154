//! The bidirectional cache: decoded images keyed by path under a byte budget.
//!
//! The cache is the central store for decoded pixels. It:
//! - Holds at most one entry per path
//! - Keeps the sum of entry sizes within the current budget
//! - Evicts with a direction bias (see [`crate::cache::evictor`])
//! - Never evicts the currently displayed image
//! - Resolves racing writers for one path by decode start time

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::entry::{CacheEntry, DirectionTag, NavigationDirection};
use crate::cache::evictor::Evictor;
use crate::decode::{DecodedImage, ImagePath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Entry of {size} bytes exceeds the whole cache budget of {budget} bytes")]
    EntryTooLarge { size: usize, budget: usize },

    #[error("Entry of {size} bytes does not fit beside the displayed image ({available} bytes available)")]
    InsufficientBudget { size: usize, available: usize },

    #[error("Cache bookkeeping mismatch: tracked {tracked} bytes, entries hold {actual} bytes")]
    InvariantViolation { tracked: usize, actual: usize },
}

/// What a successful `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New entry.
    Inserted,
    /// An older entry for the same path was replaced.
    Replaced,
    /// A newer entry already exists; the buffer was dropped.
    Stale,
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub evicted: Vec<ImagePath>,
    pub freed_bytes: usize,
    /// Whether the total is now at or below the requested target.
    pub reached_target: bool,
}

/// Cache counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: usize,
    pub budget_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_puts: u64,
    pub resets: u64,
    pub hit_rate: f64,
}

/// Decoded image cache with direction-biased eviction.
pub struct BidirectionalCache {
    /// All entries indexed by path.
    entries: HashMap<ImagePath, CacheEntry>,

    /// Sum of entry sizes.
    total_bytes: usize,

    /// Effective byte budget: the policy budget, raised to fit the
    /// displayed entry.
    budget_bytes: usize,

    /// Budget last requested through `set_budget`.
    policy_budget: usize,

    /// Current navigation direction (drives eviction order).
    navigation: NavigationDirection,

    /// Image on screen; never evicted.
    displayed: Option<ImagePath>,

    /// Access clock.
    clock: u64,

    /// Paths evicted and not re-inserted since.
    evicted: HashSet<ImagePath>,

    evictor: Evictor,

    hits: u64,
    misses: u64,
    evictions: u64,
    stale_puts: u64,
    resets: u64,
}

impl BidirectionalCache {
    /// Create an empty cache with the given budget.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            budget_bytes,
            policy_budget: budget_bytes,
            navigation: NavigationDirection::Idle,
            displayed: None,
            clock: 0,
            evicted: HashSet::new(),
            evictor: Evictor::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
            stale_puts: 0,
            resets: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a path. A hit refreshes the entry's recency; a miss only
    /// advances the access clock.
    pub fn get(&mut self, path: &Path) -> Option<DecodedImage> {
        let tick = self.next_tick();
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.touch(tick);
                self.hits += 1;
                Some(entry.image.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Whether a path is resident. Does not count as an access.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// Insert or replace the entry for `path`.
    ///
    /// `produced_at` is when the decode producing `image` started; an entry
    /// produced later is never overwritten by one produced earlier. Evicts
    /// as needed before returning.
    pub fn put(
        &mut self,
        path: ImagePath,
        image: DecodedImage,
        direction: DirectionTag,
        produced_at: Instant,
    ) -> Result<PutOutcome, CacheError> {
        let size = image.byte_size();
        if size > self.budget_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                budget: self.budget_bytes,
            });
        }

        let previous_size = match self.entries.get(&path) {
            Some(existing) if existing.produced_at > produced_at => {
                self.stale_puts += 1;
                debug!(path = %path.display(), "Dropping stale cache write");
                return Ok(PutOutcome::Stale);
            }
            Some(existing) => Some(existing.size),
            None => None,
        };

        // Everything except the displayed image can make room.
        let pinned = match &self.displayed {
            Some(shown) if **shown != *path => self.entries.get(shown).map_or(0, |e| e.size),
            _ => 0,
        };
        if pinned + size > self.budget_bytes {
            return Err(CacheError::InsufficientBudget {
                size,
                available: self.budget_bytes.saturating_sub(pinned),
            });
        }

        let tick = self.next_tick();
        let entry = CacheEntry::new(path.clone(), image, direction, produced_at, tick);
        self.entries.insert(path.clone(), entry);
        self.total_bytes = self.total_bytes - previous_size.unwrap_or(0) + size;
        self.evicted.remove(&path);

        if self.total_bytes > self.budget_bytes {
            let target = self.budget_bytes;
            self.evict_protecting(target, Some(&*path));
        }
        self.check_invariants()?;

        debug!(
            path = %path.display(),
            size,
            direction = %direction,
            total = self.total_bytes,
            "Cached image"
        );

        Ok(if previous_size.is_some() {
            PutOutcome::Replaced
        } else {
            PutOutcome::Inserted
        })
    }

    /// Evict until the total is at or below `target_bytes`.
    ///
    /// Entries behind the navigation direction go first, oldest first; then
    /// neutral entries; then entries ahead. The displayed image is kept even
    /// if that leaves the total above the target.
    pub fn evict_to_target(&mut self, target_bytes: usize) -> Result<EvictionReport, CacheError> {
        let report = self.evict_protecting(target_bytes, None);
        self.check_invariants()?;
        Ok(report)
    }

    fn evict_protecting(&mut self, target_bytes: usize, extra: Option<&Path>) -> EvictionReport {
        if self.total_bytes <= target_bytes {
            return EvictionReport {
                reached_target: true,
                ..Default::default()
            };
        }

        let victims = {
            let mut protected: Vec<&Path> = Vec::with_capacity(2);
            if let Some(shown) = &self.displayed {
                protected.push(&**shown);
            }
            if let Some(path) = extra {
                protected.push(path);
            }
            self.evictor.select_victims(
                self.entries.values(),
                self.navigation,
                self.total_bytes - target_bytes,
                &protected,
            )
        };

        let mut report = EvictionReport::default();
        for victim in victims {
            if let Some(entry) = self.entries.remove(&victim.path) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size);
                self.evictions += 1;
                report.freed_bytes += entry.size;
                debug!(
                    path = %entry.path.display(),
                    size = entry.size,
                    direction = %entry.direction,
                    "Evicted image"
                );
                self.evicted.insert(entry.path.clone());
                report.evicted.push(entry.path);
            }
        }
        report.reached_target = self.total_bytes <= target_bytes;

        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                freed = report.freed_bytes,
                total = self.total_bytes,
                target = target_bytes,
                "Eviction round complete"
            );
        }
        report
    }

    /// Change the byte budget, evicting at once if it shrank.
    ///
    /// The effective budget never drops below the displayed entry's size.
    pub fn set_budget(&mut self, budget_bytes: usize) -> Result<EvictionReport, CacheError> {
        self.policy_budget = budget_bytes;
        self.apply_budget()
    }

    /// Recompute the effective budget from the policy budget and the
    /// displayed entry, evicting down to it.
    fn apply_budget(&mut self) -> Result<EvictionReport, CacheError> {
        let pinned = self
            .displayed
            .as_ref()
            .and_then(|shown| self.entries.get(shown))
            .map_or(0, |e| e.size);
        if self.policy_budget < pinned {
            warn!(
                requested = self.policy_budget,
                pinned, "Budget below displayed image size, clamping"
            );
        }
        let budget = self.policy_budget.max(pinned);
        if budget != self.budget_bytes {
            debug!(from = self.budget_bytes, to = budget, "Cache budget changed");
        }
        self.budget_bytes = budget;
        self.evict_to_target(budget)
    }

    /// Set the navigation direction used to order evictions.
    pub fn set_navigation(&mut self, direction: NavigationDirection) {
        self.navigation = direction;
    }

    pub fn navigation(&self) -> NavigationDirection {
        self.navigation
    }

    /// Mark the image on screen. A budget raised for the previous image
    /// falls back to the policy budget, evicting at once.
    pub fn set_displayed(
        &mut self,
        path: Option<ImagePath>,
    ) -> Result<EvictionReport, CacheError> {
        self.displayed = path;
        self.apply_budget()
    }

    pub fn displayed(&self) -> Option<&ImagePath> {
        self.displayed.as_ref()
    }

    /// Hint that a path is no longer needed: it becomes the first eviction
    /// candidate of its pool. Nothing is evicted now. Returns whether the
    /// path was resident.
    pub fn release(&mut self, path: &Path) -> bool {
        if self.displayed.as_deref() == Some(path) {
            self.displayed = None;
        }
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.access_tick = 0;
                true
            }
            None => false,
        }
    }

    /// Whether the path was evicted and has not come back.
    pub fn was_evicted(&self, path: &Path) -> bool {
        self.evicted.contains(path)
    }

    /// Recompute the byte total from the entries. On mismatch the cache is
    /// reset and the violation returned.
    pub fn check_invariants(&mut self) -> Result<(), CacheError> {
        let actual: usize = self.entries.values().map(|e| e.size).sum();
        if actual == self.total_bytes && actual <= self.budget_bytes {
            return Ok(());
        }
        let violation = CacheError::InvariantViolation {
            tracked: self.total_bytes,
            actual,
        };
        error!(
            tracked = self.total_bytes,
            actual,
            budget = self.budget_bytes,
            "Cache invariant violated, resetting"
        );
        self.reset();
        Err(violation)
    }

    /// Drop every entry and recount from zero.
    pub fn reset(&mut self) {
        for path in self.entries.keys() {
            self.evicted.insert(path.clone());
        }
        self.entries.clear();
        self.total_bytes = 0;
        self.resets += 1;
    }

    /// Mean entry size, if any entries exist.
    pub fn average_entry_bytes(&self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.total_bytes / self.entries.len())
    }

    pub fn budget(&self) -> usize {
        self.budget_bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resident paths (any order).
    pub fn paths(&self) -> impl Iterator<Item = &ImagePath> {
        self.entries.keys()
    }

    /// Get cache statistics for monitoring.
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            entry_count: self.entries.len(),
            total_bytes: self.total_bytes,
            budget_bytes: self.budget_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            stale_puts: self.stale_puts,
            resets: self.resets,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    #[cfg(test)]
    fn skew_total(&mut self, delta: usize) {
        self.total_bytes += delta;
    }
}

/// Cache shared between the orchestrator and prefetch workers. Every
/// access, including a hit's recency bump, goes through the one lock.
pub type SharedCache = Arc<Mutex<BidirectionalCache>>;

/// Create a new shared cache.
pub fn new_shared_cache(budget_bytes: usize) -> SharedCache {
    Arc::new(Mutex::new(BidirectionalCache::new(budget_bytes)))
}
