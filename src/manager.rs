//! Image manager: the orchestrator and public entry point.
//!
//! The manager owns the navigation cursor over an ordered set of paths and
//! ties the other subsystems together:
//! - `request` serves the displayed image, decoding on the caller's path on
//!   a miss so it never waits behind prefetch
//! - `navigate` moves the cursor, reselects the loading strategy and
//!   retargets the preload scheduler
//! - `tick` polls the monitor and reacts to pressure transitions by
//!   resizing the cache budget
//!
//! Lock order is navigation state, then cache, then scheduler queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{
    new_shared_cache, BudgetPolicy, CacheError, CacheStats, DirectionTag, NavigationDirection,
    SharedCache,
};
use crate::config::Config;
use crate::decode::{decode_blocking, DecodeBackend, DecodeError, DecodedImage, ImagePath};
use crate::monitor::{MemoryPressureLevel, OperationKind, TelemetryMonitor};
use crate::preload::{
    LoadingStrategy, NavigationVelocity, PreloadScheduler, SchedulerStats, StrategySelector,
    VelocityTracker,
};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Image {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("Index {index} out of range for {len} images")]
    OutOfRange { index: usize, len: usize },

    #[error("No images to navigate")]
    EmptyCollection,
}

/// Where a path stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathState {
    Absent,
    Loading,
    Cached,
    Evicted,
    Failed,
}

/// Result of a cursor move.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationUpdate {
    pub position: usize,
    pub path: PathBuf,
    pub direction: NavigationDirection,
    pub strategy: LoadingStrategy,
    pub cancelled: usize,
    pub scheduled: usize,
}

/// Snapshot of the navigation state.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationSnapshot {
    pub position: usize,
    pub path: PathBuf,
    pub len: usize,
    pub direction: NavigationDirection,
    pub velocity: NavigationVelocity,
    pub strategy: LoadingStrategy,
    pub pressure: MemoryPressureLevel,
}

/// A pressure change handled by `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureTransition {
    pub from: MemoryPressureLevel,
    pub to: MemoryPressureLevel,
    pub budget_bytes: usize,
    pub strategy: LoadingStrategy,
}

struct NavigationState {
    position: usize,
    direction: NavigationDirection,
    strategy: LoadingStrategy,
    pressure: MemoryPressureLevel,
    velocity: VelocityTracker,
}

pub struct ImageManager {
    paths: Vec<ImagePath>,
    /// Position of each path in `paths`.
    positions: HashMap<ImagePath, usize>,
    cache: SharedCache,
    monitor: Arc<TelemetryMonitor>,
    backend: Arc<dyn DecodeBackend>,
    scheduler: PreloadScheduler,
    budget: BudgetPolicy,
    selector: StrategySelector,
    max_attempts: u32,
    state: Mutex<NavigationState>,
}

impl ImageManager {
    /// Build the manager and start its prefetch workers on the current
    /// runtime. The cursor starts at the first path, idle; nothing is
    /// prefetched until the first `navigate` or `jump_to`.
    pub fn new(
        config: &Config,
        paths: Vec<PathBuf>,
        backend: Arc<dyn DecodeBackend>,
        monitor: Arc<TelemetryMonitor>,
    ) -> Self {
        let budget = BudgetPolicy::from_config(config);
        let selector = StrategySelector::from_config(config);
        let pressure = monitor.pressure();
        let cache = new_shared_cache(budget.budget_for(pressure));
        let strategy = selector.select(
            pressure,
            NavigationVelocity::Slow,
            selector.size_class(None),
        );
        let scheduler = PreloadScheduler::start(config, cache.clone(), backend.clone(), monitor.clone());

        info!(
            images = paths.len(),
            budget = budget.budget_for(pressure),
            pressure = %pressure,
            strategy = %strategy,
            "Image manager ready"
        );

        let paths: Vec<ImagePath> = paths.into_iter().map(ImagePath::from).collect();
        let mut positions = HashMap::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            positions.entry(path.clone()).or_insert(index);
        }

        Self {
            paths,
            positions,
            cache,
            monitor,
            backend,
            scheduler,
            budget,
            selector,
            max_attempts: config.scheduler.max_attempts,
            state: Mutex::new(NavigationState {
                position: 0,
                direction: NavigationDirection::Idle,
                strategy,
                pressure,
                velocity: VelocityTracker::new(config.strategy.velocity_window()),
            }),
        }
    }

    /// Reuse the catalog's shared path when there is one.
    fn resolve(&self, path: &Path) -> ImagePath {
        match self.positions.get_key_value(path) {
            Some((shared, _)) => shared.clone(),
            None => ImagePath::from(path),
        }
    }

    async fn select_strategy(&self, state: &mut NavigationState, now: Instant) -> LoadingStrategy {
        let velocity = self.selector.velocity(state.velocity.events_per_sec(now));
        let size_class = self
            .selector
            .size_class(self.cache.lock().await.average_entry_bytes());
        self.selector.select(state.pressure, velocity, size_class)
    }

    /// Get the decoded image for `path`.
    ///
    /// A hit returns at once. A miss decodes on the caller's path, with
    /// one retry, and caches the result. The path becomes the displayed
    /// image and is protected from eviction.
    pub async fn request(
        &self,
        path: &Path,
        direction: NavigationDirection,
    ) -> Result<DecodedImage, ManagerError> {
        self.tick().await;
        let path = self.resolve(path);
        let started = Instant::now();

        {
            let mut cache = self.cache.lock().await;
            match cache.set_displayed(Some(path.clone())) {
                Ok(report) if !report.evicted.is_empty() => debug!(
                    evicted = report.evicted.len(),
                    freed = report.freed_bytes,
                    "Budget restored after display change"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Cache reset while changing displayed image"),
            }
            if let Some(image) = cache.get(&path) {
                drop(cache);
                self.monitor
                    .record_operation(OperationKind::CacheHit, started.elapsed());
                debug!(path = %path.display(), "Cache hit");
                return Ok(image);
            }
        }

        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match decode_blocking(self.backend.clone(), path.clone()).await {
                Ok(image) => break Ok(image),
                Err(e) if attempts < self.max_attempts => {
                    warn!(
                        path = %path.display(),
                        attempt = attempts,
                        error = %e,
                        "Decode failed, retrying"
                    );
                }
                Err(e) => break Err(e),
            }
        };
        self.monitor
            .record_operation(OperationKind::Decode, started.elapsed());

        let image = match result {
            Ok(image) => image,
            Err(source) => {
                self.scheduler.mark_failed(path.clone()).await;
                warn!(
                    path = %path.display(),
                    attempts,
                    error = %source,
                    "Image unavailable"
                );
                return Err(ManagerError::Unavailable {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        self.scheduler.clear_failure(&path).await;

        let outcome = self.cache.lock().await.put(
            path.clone(),
            image.clone(),
            DirectionTag::from(direction),
            started,
        );
        match outcome {
            Ok(outcome) => debug!(
                path = %path.display(),
                size = image.byte_size(),
                outcome = ?outcome,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Decoded on request"
            ),
            Err(CacheError::EntryTooLarge { size, budget }) => {
                self.monitor.record_allocation_failure();
                warn!(
                    path = %path.display(),
                    size,
                    budget,
                    "Image larger than cache budget, serving uncached"
                );
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Decoded image not cached"),
        }

        Ok(image)
    }

    /// Step the cursor one image in `direction` (`Idle` stays put) and
    /// retarget prefetching. The cursor stops at either end.
    pub async fn navigate(
        &self,
        direction: NavigationDirection,
    ) -> Result<NavigationUpdate, ManagerError> {
        self.tick().await;
        if self.paths.is_empty() {
            return Err(ManagerError::EmptyCollection);
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;
        let last = self.paths.len() - 1;
        let position = match direction {
            NavigationDirection::Forward => (state.position + 1).min(last),
            NavigationDirection::Backward => state.position.saturating_sub(1),
            NavigationDirection::Idle => state.position,
        };
        if direction.is_moving() {
            state.velocity.record(now);
        }

        self.move_cursor(&mut state, position, direction, now).await
    }

    /// Move the cursor to `index` without counting it as a navigation step.
    pub async fn jump_to(&self, index: usize) -> Result<NavigationUpdate, ManagerError> {
        self.tick().await;
        if index >= self.paths.len() {
            return Err(ManagerError::OutOfRange {
                index,
                len: self.paths.len(),
            });
        }
        let mut state = self.state.lock().await;
        self.move_cursor(&mut state, index, NavigationDirection::Idle, Instant::now())
            .await
    }

    async fn move_cursor(
        &self,
        state: &mut NavigationState,
        position: usize,
        direction: NavigationDirection,
        now: Instant,
    ) -> Result<NavigationUpdate, ManagerError> {
        state.position = position;
        state.direction = direction;
        self.cache.lock().await.set_navigation(direction);

        let strategy = self.select_strategy(state, now).await;
        if strategy != state.strategy {
            info!(from = %state.strategy, to = %strategy, "Loading strategy changed");
        }
        state.strategy = strategy;

        let report = self
            .scheduler
            .retarget(position, direction, strategy, &self.paths)
            .await;

        let path = self.paths[position].to_path_buf();
        debug!(
            position,
            path = %path.display(),
            direction = %direction,
            strategy = %strategy,
            "Navigated"
        );

        Ok(NavigationUpdate {
            position,
            path,
            direction,
            strategy,
            cancelled: report.cancelled,
            scheduled: report.scheduled,
        })
    }

    /// Advisory: `path` is no longer needed. Its entry becomes the next
    /// eviction candidate and any queued prefetch is cancelled. Nothing is
    /// evicted now. Returns whether the path was cached.
    pub async fn release(&self, path: &Path) -> bool {
        let cached = self.cache.lock().await.release(path);
        let cancelled = self.scheduler.release(path).await;
        debug!(path = %path.display(), cached, cancelled, "Released image");
        cached
    }

    /// React to the monitor's latest pressure level. On a transition the
    /// cache budget and loading strategy are recomputed and prefetching is
    /// retargeted.
    pub async fn tick(&self) -> Option<PressureTransition> {
        let pressure = self.monitor.pressure();
        let mut state = self.state.lock().await;
        if pressure == state.pressure {
            return None;
        }

        let from = state.pressure;
        state.pressure = pressure;
        let budget_bytes = self.budget.budget_for(pressure);
        match self.cache.lock().await.set_budget(budget_bytes) {
            Ok(report) => debug!(
                evicted = report.evicted.len(),
                freed = report.freed_bytes,
                "Cache budget applied"
            ),
            Err(e) => warn!(error = %e, "Cache reset while applying budget"),
        }

        let strategy = self.select_strategy(&mut state, Instant::now()).await;
        state.strategy = strategy;
        if !self.paths.is_empty() {
            self.scheduler
                .retarget(state.position, state.direction, strategy, &self.paths)
                .await;
        }

        info!(
            from = %from,
            to = %pressure,
            budget = budget_bytes,
            strategy = %strategy,
            "Memory pressure changed"
        );

        Some(PressureTransition {
            from,
            to: pressure,
            budget_bytes,
            strategy,
        })
    }

    /// Lifecycle state of `path`.
    pub async fn path_state(&self, path: &Path) -> PathState {
        {
            let cache = self.cache.lock().await;
            if cache.contains(path) {
                return PathState::Cached;
            }
        }
        if self.scheduler.is_in_flight(path).await || self.scheduler.is_queued(path).await {
            return PathState::Loading;
        }
        if self.scheduler.in_cooldown(path).await {
            return PathState::Failed;
        }
        if self.cache.lock().await.was_evicted(path) {
            return PathState::Evicted;
        }
        PathState::Absent
    }

    /// Current navigation state, or `None` for an empty collection.
    pub async fn current(&self) -> Option<NavigationSnapshot> {
        let mut state = self.state.lock().await;
        let path = self.paths.get(state.position)?.to_path_buf();
        let rate = state.velocity.events_per_sec(Instant::now());
        Some(NavigationSnapshot {
            position: state.position,
            path,
            len: self.paths.len(),
            direction: state.direction,
            velocity: self.selector.velocity(rate),
            strategy: state.strategy,
            pressure: state.pressure,
        })
    }

    pub fn path_at(&self, index: usize) -> Option<&ImagePath> {
        self.paths.get(index)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats().await
    }

    pub fn monitor(&self) -> &Arc<TelemetryMonitor> {
        &self.monitor
    }

    /// Stop prefetching and wait for the workers.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        info!("Image manager stopped");
    }
}
