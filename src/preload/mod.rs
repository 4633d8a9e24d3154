//! Background preloading.
//!
//! - [`strategy`]: how far ahead to prefetch, from pressure and velocity
//! - [`task`]: prefetch task descriptors
//! - [`queue`]: priority queue, dedup and failure cooldowns
//! - [`scheduler`]: the worker pool that drains the queue into the cache

pub mod queue;
pub mod scheduler;
pub mod strategy;
pub mod task;

pub use queue::{PreloadQueue, SchedulerStats};
pub use scheduler::{prefetch_window, PreloadScheduler, RetargetReport, WindowSlot};
pub use strategy::{
    ImageSizeClass, LoadingStrategy, NavigationVelocity, StrategySelector, VelocityTracker,
};
pub use task::{PreloadTask, TaskId, TaskPriority, TaskStatus};
