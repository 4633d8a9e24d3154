//! Loading strategy selection.
//!
//! The selector is a pure function of memory pressure, navigation velocity
//! and the typical decoded image size. Fast paging shrinks the window even
//! under low pressure: images prefetched far ahead are likely to be skipped
//! before anyone looks at them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Config;
use crate::monitor::MemoryPressureLevel;

/// How much background work to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LoadingStrategy {
    /// Prefetch a fixed window.
    Eager { depth: usize },
    /// Prefetch a window scaled down for pressure.
    Adaptive { depth: usize },
    /// No prefetch; images load on demand.
    Minimal,
    /// No background work at all; every image decodes on the request path.
    Fallback,
}

impl LoadingStrategy {
    /// Number of images to prefetch in the travel direction.
    pub fn depth(&self) -> usize {
        match self {
            LoadingStrategy::Eager { depth } | LoadingStrategy::Adaptive { depth } => *depth,
            LoadingStrategy::Minimal | LoadingStrategy::Fallback => 0,
        }
    }

    /// Whether prefetch workers may run at all.
    pub fn allows_background(&self) -> bool {
        !matches!(self, LoadingStrategy::Fallback)
    }
}

impl std::fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadingStrategy::Eager { depth } => write!(f, "eager({depth})"),
            LoadingStrategy::Adaptive { depth } => write!(f, "adaptive({depth})"),
            LoadingStrategy::Minimal => write!(f, "minimal"),
            LoadingStrategy::Fallback => write!(f, "fallback"),
        }
    }
}

/// Coarse navigation speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationVelocity {
    Slow,
    Fast,
}

/// Coarse decoded image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSizeClass {
    Small,
    Medium,
    Large,
}

/// Navigation events per second over a sliding window.
#[derive(Debug, Clone)]
pub struct VelocityTracker {
    window: Duration,
    events: VecDeque<Instant>,
}

impl VelocityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.events.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a navigation event.
    pub fn record(&mut self, at: Instant) {
        self.events.push_back(at);
        self.expire(at);
    }

    /// Events per second over the window ending at `now`.
    pub fn events_per_sec(&mut self, now: Instant) -> f64 {
        self.expire(now);
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.events.len() as f64 / secs
    }
}

/// Maps (pressure, velocity, size class) to a [`LoadingStrategy`].
#[derive(Debug, Clone)]
pub struct StrategySelector {
    eager_depth: usize,
    adaptive_depth: usize,
    adaptive_depth_fast: usize,
    fast_events_per_sec: f64,
    small_image_bytes: usize,
    large_image_bytes: usize,
}

impl StrategySelector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            eager_depth: config.default_preload_depth,
            adaptive_depth: config.strategy.adaptive_depth,
            adaptive_depth_fast: config.strategy.adaptive_depth_fast,
            fast_events_per_sec: config.strategy.fast_events_per_sec,
            small_image_bytes: config.strategy.small_image_bytes,
            large_image_bytes: config.strategy.large_image_bytes,
        }
    }

    /// Classify a navigation rate.
    pub fn velocity(&self, events_per_sec: f64) -> NavigationVelocity {
        if events_per_sec > self.fast_events_per_sec {
            NavigationVelocity::Fast
        } else {
            NavigationVelocity::Slow
        }
    }

    /// Classify the average decoded size. Unknown sizes count as medium.
    pub fn size_class(&self, average_bytes: Option<usize>) -> ImageSizeClass {
        match average_bytes {
            Some(bytes) if bytes < self.small_image_bytes => ImageSizeClass::Small,
            Some(bytes) if bytes > self.large_image_bytes => ImageSizeClass::Large,
            _ => ImageSizeClass::Medium,
        }
    }

    /// Pick the strategy. Never blocks.
    ///
    /// For a fixed velocity and size class the resulting depth never grows
    /// as pressure rises.
    pub fn select(
        &self,
        pressure: MemoryPressureLevel,
        velocity: NavigationVelocity,
        size_class: ImageSizeClass,
    ) -> LoadingStrategy {
        let eager = match velocity {
            NavigationVelocity::Slow => self.eager_depth,
            NavigationVelocity::Fast => self.eager_depth.div_ceil(2),
        };
        let adaptive = match velocity {
            NavigationVelocity::Slow => self.adaptive_depth,
            NavigationVelocity::Fast => self.adaptive_depth_fast,
        }
        .min(eager);

        let shrink = |depth: usize| {
            if size_class == ImageSizeClass::Large && depth > 1 {
                depth - 1
            } else {
                depth
            }
        };

        match pressure {
            MemoryPressureLevel::Low => LoadingStrategy::Eager {
                depth: shrink(eager),
            },
            MemoryPressureLevel::Medium => LoadingStrategy::Adaptive {
                depth: shrink(adaptive),
            },
            MemoryPressureLevel::High => LoadingStrategy::Minimal,
            MemoryPressureLevel::Critical => LoadingStrategy::Fallback,
        }
    }
}
