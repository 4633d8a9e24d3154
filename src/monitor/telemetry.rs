//! The telemetry monitor: memory sampling, pressure classification and
//! operation latency tracking.
//!
//! Writers (the sampler task, decode paths calling `record_operation`) go
//! through a single mutex. After every mutation the derived status is
//! published into atomics, so `get_status()` never blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::monitor::pressure::{MemoryPressureLevel, PressureClassifier};
use crate::monitor::source::MemorySource;

/// Kinds of timed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A request served from cache.
    CacheHit,
    /// A synchronous decode on the request path.
    Decode,
    /// A background prefetch decode.
    Prefetch,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::CacheHit => write!(f, "cache_hit"),
            OperationKind::Decode => write!(f, "decode"),
            OperationKind::Prefetch => write!(f, "prefetch"),
        }
    }
}

/// Snapshot of the monitor's last published state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub pressure: MemoryPressureLevel,
    pub free_bytes: u64,
    pub total_bytes: u64,
    /// Median over the recent latency samples of all operation kinds.
    pub recent_latency_p50: Duration,
    pub stalled_operations: u64,
    pub samples: u64,
    pub sample_failures: u64,
    pub transitions: u64,
}

/// Bounded ring of recent durations.
#[derive(Debug)]
struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, duration: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }
}

fn median(mut values: Vec<Duration>) -> Duration {
    if values.is_empty() {
        return Duration::ZERO;
    }
    values.sort_unstable();
    values[values.len() / 2]
}

#[derive(Debug)]
struct MonitorState {
    level: MemoryPressureLevel,
    latencies: HashMap<OperationKind, LatencyWindow>,
    allocation_failures: u64,
}

/// Samples system memory and recent operation latencies.
pub struct TelemetryMonitor {
    source: Arc<dyn MemorySource>,
    classifier: PressureClassifier,
    config: MonitorConfig,

    /// Single mutation point.
    state: Mutex<MonitorState>,

    // Published status.
    pressure: AtomicU8,
    free_bytes: AtomicU64,
    total_bytes: AtomicU64,
    p50_nanos: AtomicU64,
    stalled: AtomicU64,
    samples: AtomicU64,
    sample_failures: AtomicU64,
    transitions: AtomicU64,
}

impl TelemetryMonitor {
    pub fn new(source: Arc<dyn MemorySource>, config: MonitorConfig) -> Self {
        Self {
            source,
            classifier: PressureClassifier::new(&config),
            config,
            state: Mutex::new(MonitorState {
                level: MemoryPressureLevel::Low,
                latencies: HashMap::new(),
                allocation_failures: 0,
            }),
            pressure: AtomicU8::new(MemoryPressureLevel::Low.level()),
            free_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            p50_nanos: AtomicU64::new(0),
            stalled: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            sample_failures: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one memory sample and publish the resulting pressure level.
    ///
    /// A failed sample keeps the previous level.
    pub async fn sample(&self) -> MemoryPressureLevel {
        let reading = self.source.sample().await;

        let mut state = self.lock_state();
        let previous = state.level;

        let sample = match reading {
            Ok(sample) => sample,
            Err(e) => {
                self.sample_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, level = %previous, "Memory sample failed, holding pressure level");
                return previous;
            }
        };

        let mut level = self.classifier.classify(previous, sample.free_ratio());
        if state.allocation_failures > 0 {
            let raised = level.max(previous).raise();
            debug!(
                failures = state.allocation_failures,
                from = %level,
                to = %raised,
                "Raising pressure after allocation failures"
            );
            level = raised;
            state.allocation_failures = 0;
        }
        state.level = level;

        self.free_bytes.store(sample.free_bytes, Ordering::Release);
        self.total_bytes.store(sample.total_bytes, Ordering::Release);
        self.pressure.store(level.level(), Ordering::Release);
        self.samples.fetch_add(1, Ordering::Relaxed);

        if level != previous {
            self.transitions.fetch_add(1, Ordering::Relaxed);
            info!(
                from = %previous,
                to = %level,
                free_ratio = sample.free_ratio(),
                "Memory pressure transition"
            );
        }

        level
    }

    /// Record the duration of a completed operation.
    pub fn record_operation(&self, kind: OperationKind, duration: Duration) {
        let mut state = self.lock_state();
        let capacity = self.config.latency_window;
        state
            .latencies
            .entry(kind)
            .or_insert_with(|| LatencyWindow::new(capacity))
            .push(duration);

        let all: Vec<Duration> = state
            .latencies
            .values()
            .flat_map(|w| w.samples.iter().copied())
            .collect();
        let p50 = median(all);
        self.p50_nanos
            .store(p50.as_nanos().min(u64::MAX as u128) as u64, Ordering::Release);

        if duration > self.config.stall_threshold() {
            self.stalled.fetch_add(1, Ordering::Relaxed);
            warn!(
                kind = %kind,
                duration_ms = duration.as_millis() as u64,
                "Slow operation"
            );
        }
    }

    /// Note an allocation the cache had to refuse. Raises pressure by one
    /// level at the next sample.
    pub fn record_allocation_failure(&self) {
        let mut state = self.lock_state();
        state.allocation_failures += 1;
    }

    /// Median latency of one operation kind.
    pub fn latency_p50(&self, kind: OperationKind) -> Duration {
        let state = self.lock_state();
        state
            .latencies
            .get(&kind)
            .map(|w| median(w.samples.iter().copied().collect()))
            .unwrap_or(Duration::ZERO)
    }

    /// Last published pressure level.
    pub fn pressure(&self) -> MemoryPressureLevel {
        MemoryPressureLevel::from_level(self.pressure.load(Ordering::Acquire))
    }

    /// Lock-free snapshot of the last published status.
    pub fn get_status(&self) -> MonitorStatus {
        MonitorStatus {
            pressure: self.pressure(),
            free_bytes: self.free_bytes.load(Ordering::Acquire),
            total_bytes: self.total_bytes.load(Ordering::Acquire),
            recent_latency_p50: Duration::from_nanos(self.p50_nanos.load(Ordering::Acquire)),
            stalled_operations: self.stalled.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            sample_failures: self.sample_failures.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
        }
    }

    /// Start periodic sampling on the runtime. Abort the handle to stop.
    pub fn spawn_sampler(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let period = monitor.config.sample_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.sample().await;
            }
        })
    }
}
