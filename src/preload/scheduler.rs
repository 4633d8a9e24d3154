//! Preload scheduler: a bounded pool of tokio workers that decode images
//! ahead of navigation and insert them into the shared cache.
//!
//! Workers pull from a [`PreloadQueue`]. Retargeting only touches queued
//! tasks; a decode that has started always runs to completion and its
//! result is cached even if the user has turned around.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, DirectionTag, NavigationDirection, SharedCache};
use crate::config::Config;
use crate::decode::{decode_blocking, DecodeBackend, ImagePath};
use crate::monitor::{OperationKind, TelemetryMonitor};
use crate::preload::queue::{PreloadQueue, SchedulerStats};
use crate::preload::strategy::LoadingStrategy;
use crate::preload::task::PreloadTask;

/// One position the scheduler wants decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSlot {
    pub index: usize,
    pub distance: usize,
}

/// Positions to prefetch around `position`, nearest first.
///
/// Moving: `depth` steps in the travel direction. Idle: one step on each
/// side when depth allows any prefetch at all.
pub fn prefetch_window(
    position: usize,
    len: usize,
    direction: NavigationDirection,
    depth: usize,
) -> Vec<WindowSlot> {
    let mut slots = Vec::new();
    if depth == 0 || len == 0 {
        return slots;
    }

    let steps: &[isize] = match direction {
        NavigationDirection::Forward => &[1],
        NavigationDirection::Backward => &[-1],
        NavigationDirection::Idle => &[1, -1],
    };
    let depth = if direction.is_moving() { depth } else { 1 };

    for distance in 1..=depth {
        for step in steps {
            let target = position as isize + step * distance as isize;
            if target >= 0 && (target as usize) < len {
                slots.push(WindowSlot {
                    index: target as usize,
                    distance,
                });
            }
        }
    }
    slots
}

/// What a retarget changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetargetReport {
    pub cancelled: usize,
    pub scheduled: usize,
}

pub struct PreloadScheduler {
    queue: Arc<Mutex<PreloadQueue>>,
    cache: SharedCache,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl PreloadScheduler {
    /// Spawn `max_concurrency` workers on the current runtime.
    pub fn start(
        config: &Config,
        cache: SharedCache,
        backend: Arc<dyn DecodeBackend>,
        monitor: Arc<TelemetryMonitor>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(PreloadQueue::new(
            config.max_concurrency,
            config.scheduler.failure_cooldown(),
        )));
        let notify = Arc::new(Notify::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..config.max_concurrency)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    cache: cache.clone(),
                    backend: backend.clone(),
                    monitor: monitor.clone(),
                    notify: notify.clone(),
                    shutdown: shutdown.clone(),
                    max_attempts: config.scheduler.max_attempts,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers = config.max_concurrency,
            cooldown_ms = config.scheduler.failure_cooldown_ms,
            "Preload scheduler started"
        );

        Self {
            queue,
            cache,
            notify,
            shutdown,
            workers,
        }
    }

    /// Point the scheduler at a new position, direction and strategy.
    ///
    /// Queued tasks scheduled for another direction, or outside the new
    /// window, are cancelled. `Fallback` also pauses the workers until a
    /// later retarget lifts it.
    pub async fn retarget(
        &self,
        position: usize,
        direction: NavigationDirection,
        strategy: LoadingStrategy,
        paths: &[ImagePath],
    ) -> RetargetReport {
        let window = prefetch_window(position, paths.len(), direction, strategy.depth());

        let missing: Vec<WindowSlot> = {
            let cache = self.cache.lock().await;
            window
                .iter()
                .copied()
                .filter(|slot| !cache.contains(&paths[slot.index]))
                .collect()
        };
        let wanted: HashSet<&Path> = window.iter().map(|slot| &*paths[slot.index]).collect();

        let now = Instant::now();
        let mut queue = self.queue.lock().await;
        let was_paused = queue.is_paused();
        queue.set_paused(!strategy.allows_background());

        let cancelled = queue
            .cancel_where(|task| task.direction != direction || !wanted.contains(&*task.path))
            .len();

        let mut scheduled = 0;
        for slot in missing {
            let task = PreloadTask::new(paths[slot.index].clone(), slot.index, direction, slot.distance);
            if queue.schedule(task, now).is_ok() {
                scheduled += 1;
            }
        }
        let resumed = was_paused && !queue.is_paused();
        drop(queue);

        if scheduled > 0 || resumed {
            self.notify.notify_waiters();
        }

        debug!(
            position,
            direction = %direction,
            strategy = %strategy,
            cancelled,
            scheduled,
            "Retargeted preload window"
        );

        RetargetReport {
            cancelled,
            scheduled,
        }
    }

    /// Cancel any queued prefetch of `path`.
    pub async fn release(&self, path: &Path) -> bool {
        self.queue.lock().await.cancel_path(path)
    }

    /// Keep `path` out of prefetch for the cooldown period.
    pub async fn mark_failed(&self, path: ImagePath) {
        self.queue.lock().await.mark_failed(path, Instant::now());
    }

    /// Forget an earlier failure of `path`.
    pub async fn clear_failure(&self, path: &Path) {
        self.queue.lock().await.clear_cooldown(path);
    }

    pub async fn in_cooldown(&self, path: &Path) -> bool {
        self.queue.lock().await.in_cooldown(path, Instant::now())
    }

    pub async fn is_in_flight(&self, path: &Path) -> bool {
        self.queue.lock().await.is_in_flight(path)
    }

    pub async fn is_queued(&self, path: &Path) -> bool {
        self.queue.lock().await.is_queued(path)
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.queue.lock().await.stats()
    }

    /// Stop the workers and wait for them. Queued tasks are cancelled;
    /// decodes already running finish first.
    pub async fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        let cancelled = self.queue.lock().await.cancel_all();
        self.notify.notify_waiters();

        let workers = std::mem::take(&mut self.workers);
        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Prefetch worker ended abnormally");
            }
        }
        info!(cancelled, "Preload scheduler stopped");
    }
}

impl Drop for PreloadScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// A single prefetch worker task.
struct Worker {
    id: usize,
    queue: Arc<Mutex<PreloadQueue>>,
    cache: SharedCache,
    backend: Arc<dyn DecodeBackend>,
    monitor: Arc<TelemetryMonitor>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
    max_attempts: u32,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Prefetch worker started");
        loop {
            // Register for wakeups before looking at the queue so a
            // notification between the check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let next = self.queue.lock().await.next();
            match next {
                Some(task) => self.execute(task).await,
                None => notified.await,
            }
        }
        debug!(worker = self.id, "Prefetch worker exiting");
    }

    async fn execute(&self, mut task: PreloadTask) {
        if self.cache.lock().await.contains(&task.path) {
            self.queue.lock().await.complete(task.id, true);
            return;
        }

        let started = Instant::now();
        let result = loop {
            task.attempts += 1;
            match decode_blocking(self.backend.clone(), task.path.clone()).await {
                Ok(image) => break Ok(image),
                Err(e) if task.attempts < self.max_attempts => {
                    warn!(
                        worker = self.id,
                        path = %task.path.display(),
                        attempt = task.attempts,
                        error = %e,
                        "Prefetch decode failed, retrying"
                    );
                }
                Err(e) => break Err(e),
            }
        };
        let elapsed = started.elapsed();
        self.monitor.record_operation(OperationKind::Prefetch, elapsed);

        match result {
            Ok(image) => {
                let size = image.byte_size();
                let outcome = self.cache.lock().await.put(
                    task.path.clone(),
                    image,
                    DirectionTag::from(task.direction),
                    started,
                );
                match outcome {
                    Ok(outcome) => debug!(
                        worker = self.id,
                        path = %task.path.display(),
                        size,
                        outcome = ?outcome,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Prefetched image"
                    ),
                    Err(CacheError::EntryTooLarge { size, budget }) => {
                        self.monitor.record_allocation_failure();
                        warn!(
                            path = %task.path.display(),
                            size,
                            budget,
                            "Prefetched image larger than cache budget"
                        );
                    }
                    Err(e) => debug!(
                        path = %task.path.display(),
                        error = %e,
                        "Prefetched image not cached"
                    ),
                }
                let mut queue = self.queue.lock().await;
                queue.clear_cooldown(&task.path);
                queue.complete(task.id, false);
            }
            Err(e) => {
                warn!(
                    worker = self.id,
                    path = %task.path.display(),
                    attempts = task.attempts,
                    error = %e,
                    "Prefetch failed, cooling down path"
                );
                self.queue.lock().await.fail(task.id, Instant::now());
            }
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes.
#[cfg(test)]
pub(crate) async fn wait_for<F, Fut>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    condition().await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;
    use std::time::Duration;

    use super::*;
    use crate::cache::new_shared_cache;
    use crate::decode::{DecodeError, DecodedImage};
    use crate::monitor::FixedMemorySource;

    const WAIT: Duration = Duration::from_secs(5);

    /// Backend whose decodes block until the gate opens.
    struct GatedBackend {
        open: std::sync::Mutex<bool>,
        cond: Condvar,
        calls: AtomicUsize,
        fail: bool,
    }

    impl GatedBackend {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                open: std::sync::Mutex::new(open),
                cond: Condvar::new(),
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                open: std::sync::Mutex::new(true),
                cond: Condvar::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.cond.notify_all();
        }
    }

    impl DecodeBackend for GatedBackend {
        fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
            if self.fail {
                return Err(DecodeError::Failed {
                    path: path.to_path_buf(),
                    reason: "corrupt".into(),
                });
            }
            Ok(DecodedImage::new(vec![0u8; 100], 10, 10))
        }
    }

    fn paths(n: usize) -> Vec<ImagePath> {
        (0..n)
            .map(|i| Path::new(&format!("img-{i:03}.jpg")).into())
            .collect()
    }

    fn start(config: &Config, cache: SharedCache, backend: Arc<GatedBackend>) -> PreloadScheduler {
        let monitor = Arc::new(TelemetryMonitor::new(
            Arc::new(FixedMemorySource::with_free_ratio(0.9)),
            config.monitor.clone(),
        ));
        PreloadScheduler::start(config, cache, backend, monitor)
    }

    fn config(max_concurrency: usize) -> Config {
        Config {
            max_concurrency,
            ..Config::default()
        }
    }

    #[test]
    fn test_window_forward_and_backward() {
        let fwd = prefetch_window(10, 20, NavigationDirection::Forward, 3);
        assert_eq!(
            fwd.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![11, 12, 13]
        );
        assert_eq!(fwd[0].distance, 1);

        let back = prefetch_window(1, 20, NavigationDirection::Backward, 3);
        assert_eq!(back.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0]);

        let end = prefetch_window(19, 20, NavigationDirection::Forward, 3);
        assert!(end.is_empty());
    }

    #[test]
    fn test_window_idle_and_zero_depth() {
        let idle = prefetch_window(5, 20, NavigationDirection::Idle, 5);
        assert_eq!(idle.iter().map(|s| s.index).collect::<Vec<_>>(), vec![6, 4]);
        assert!(prefetch_window(5, 20, NavigationDirection::Forward, 0).is_empty());
        assert!(prefetch_window(0, 0, NavigationDirection::Forward, 3).is_empty());
    }

    #[tokio::test]
    async fn test_prefetches_window_into_cache() {
        let cache = new_shared_cache(1_000_000);
        let backend = GatedBackend::new(true);
        let scheduler = start(&config(2), cache.clone(), backend.clone());
        let paths = paths(20);

        let report = scheduler
            .retarget(3, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 3 }, &paths)
            .await;
        assert_eq!(report.scheduled, 3);

        let done = wait_for(WAIT, || async {
            let cache = cache.lock().await;
            (4..=6).all(|i| cache.contains(&paths[i]))
        })
        .await;
        assert!(done);

        // Everything is cached: a second retarget schedules nothing.
        let report = scheduler
            .retarget(3, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 3 }, &paths)
            .await;
        assert_eq!(report.scheduled, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_reversal_cancels_queued_but_not_in_flight() {
        let cache = new_shared_cache(1_000_000);
        let backend = GatedBackend::new(false);
        let scheduler = start(&config(1), cache.clone(), backend.clone());
        let paths = paths(20);

        scheduler
            .retarget(10, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 5 }, &paths)
            .await;
        assert!(wait_for(WAIT, || async { scheduler.stats().await.in_flight == 1 }).await);
        assert_eq!(scheduler.stats().await.queued, 4);
        assert!(scheduler.is_in_flight(&paths[11]).await);

        let report = scheduler
            .retarget(10, NavigationDirection::Backward, LoadingStrategy::Eager { depth: 5 }, &paths)
            .await;
        assert_eq!(report.cancelled, 4);
        assert_eq!(report.scheduled, 5);

        backend.open();
        let done = wait_for(WAIT, || async {
            let cache = cache.lock().await;
            cache.contains(&paths[11]) && (5..=9).all(|i| cache.contains(&paths[i]))
        })
        .await;
        assert!(done, "in-flight result and backward window should land");
        assert!(!cache.lock().await.contains(&paths[12]));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_minimal_cancels_everything_queued() {
        let cache = new_shared_cache(1_000_000);
        let backend = GatedBackend::new(false);
        let scheduler = start(&config(1), cache.clone(), backend.clone());
        let paths = paths(20);

        scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 5 }, &paths)
            .await;
        assert!(wait_for(WAIT, || async { scheduler.stats().await.in_flight == 1 }).await);

        let report = scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Minimal, &paths)
            .await;
        assert_eq!(report.cancelled, 4);
        assert_eq!(report.scheduled, 0);

        backend.open();
        assert!(wait_for(WAIT, || async { cache.lock().await.contains(&paths[1]) }).await);
        assert_eq!(cache.lock().await.len(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_fallback_pauses_workers() {
        let cache = new_shared_cache(1_000_000);
        let backend = GatedBackend::new(true);
        let scheduler = start(&config(2), cache.clone(), backend.clone());
        let paths = paths(10);

        scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Fallback, &paths)
            .await;
        let stats = scheduler.stats().await;
        assert!(stats.paused);
        assert_eq!(stats.queued, 0);

        scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 2 }, &paths)
            .await;
        assert!(!scheduler.stats().await.paused);
        assert!(wait_for(WAIT, || async { cache.lock().await.len() == 2 }).await);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_prefetch_retries_once_then_cools_down() {
        let cache = new_shared_cache(1_000_000);
        let backend = GatedBackend::failing();
        let scheduler = start(&config(1), cache.clone(), backend.clone());
        let paths = paths(3);

        scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 1 }, &paths)
            .await;
        assert!(wait_for(WAIT, || async { scheduler.stats().await.total_failed == 1 }).await);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(scheduler.in_cooldown(&paths[1]).await);

        let report = scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 1 }, &paths)
            .await;
        assert_eq!(report.scheduled, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_cancels_queued() {
        let cache = new_shared_cache(1_000_000);
        let backend = GatedBackend::new(false);
        let scheduler = start(&config(1), cache.clone(), backend.clone());
        let paths = paths(10);

        scheduler
            .retarget(0, NavigationDirection::Forward, LoadingStrategy::Eager { depth: 3 }, &paths)
            .await;
        assert!(wait_for(WAIT, || async { scheduler.stats().await.in_flight == 1 }).await);
        assert!(scheduler.release(&paths[3]).await);
        assert!(!scheduler.is_queued(&paths[3]).await);

        backend.open();
        scheduler.shutdown().await;
    }
}
