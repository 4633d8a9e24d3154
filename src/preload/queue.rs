//! Prefetch queue: ordered pending tasks, in-flight bookkeeping and
//! per-path failure cooldowns.
//!
//! The queue itself never runs anything; workers in
//! [`crate::preload::scheduler`] pull from it.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::decode::ImagePath;
use crate::preload::task::{PreloadTask, TaskId, TaskStatus};

/// Why a task was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyQueued,
    InFlight,
    CoolingDown,
}

/// Scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub in_flight: usize,
    pub paused: bool,
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_skipped: u64,
}

pub struct PreloadQueue {
    /// Pending tasks, highest priority then nearest first.
    queue: VecDeque<PreloadTask>,

    /// Tasks handed to workers.
    in_flight: HashMap<TaskId, PreloadTask>,

    /// Maximum concurrent decodes.
    max_concurrent: usize,

    /// While paused `next` hands out nothing.
    paused: bool,

    /// Paths whose last decode failed, with the end of their cooldown.
    cooldowns: HashMap<ImagePath, Instant>,
    cooldown: Duration,

    next_id: TaskId,
    stats: SchedulerStats,
}

impl PreloadQueue {
    pub fn new(max_concurrent: usize, cooldown: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            max_concurrent,
            paused: false,
            cooldowns: HashMap::new(),
            cooldown,
            next_id: 1,
            stats: SchedulerStats::default(),
        }
    }

    /// Enqueue a task unless its path is already queued, in flight or
    /// cooling down. Returns the assigned id.
    pub fn schedule(&mut self, mut task: PreloadTask, now: Instant) -> Result<TaskId, Rejection> {
        if self.is_in_flight(&task.path) {
            return Err(Rejection::InFlight);
        }
        if self.is_queued(&task.path) {
            return Err(Rejection::AlreadyQueued);
        }
        if self.in_cooldown(&task.path, now) {
            return Err(Rejection::CoolingDown);
        }

        task.id = self.next_id;
        task.status = TaskStatus::Queued;
        self.next_id += 1;

        // Ahead of the first task it outranks; equal keys keep FIFO order.
        let pos = self
            .queue
            .iter()
            .position(|existing| {
                (existing.priority, std::cmp::Reverse(existing.distance))
                    < (task.priority, std::cmp::Reverse(task.distance))
            })
            .unwrap_or(self.queue.len());

        debug!(
            task_id = task.id,
            path = %task.path.display(),
            index = task.index,
            priority = ?task.priority,
            direction = %task.direction,
            "Scheduled prefetch"
        );

        let id = task.id;
        self.queue.insert(pos, task);
        self.stats.total_scheduled += 1;
        Ok(id)
    }

    /// Dequeue the next task if there's capacity.
    pub fn next(&mut self) -> Option<PreloadTask> {
        if self.paused || self.in_flight.len() >= self.max_concurrent {
            return None;
        }

        let mut task = self.queue.pop_front()?;
        task.status = TaskStatus::InFlight;
        self.in_flight.insert(task.id, task.clone());
        Some(task)
    }

    /// Finish an in-flight task that produced an image (or found one
    /// already cached, when `skipped`).
    pub fn complete(&mut self, id: TaskId, skipped: bool) -> Option<PreloadTask> {
        let mut task = self.in_flight.remove(&id)?;
        task.status = TaskStatus::Completed;
        if skipped {
            self.stats.total_skipped += 1;
        } else {
            self.stats.total_completed += 1;
        }
        Some(task)
    }

    /// Finish an in-flight task whose decode failed for good. The path
    /// cools down.
    pub fn fail(&mut self, id: TaskId, now: Instant) -> Option<PreloadTask> {
        let mut task = self.in_flight.remove(&id)?;
        task.status = TaskStatus::Failed;
        self.stats.total_failed += 1;
        self.mark_failed(task.path.clone(), now);
        Some(task)
    }

    /// Start (or restart) the cooldown of a path.
    pub fn mark_failed(&mut self, path: ImagePath, now: Instant) {
        self.cooldowns.insert(path, now + self.cooldown);
    }

    /// Whether a path's last failure is recent. Expired cooldowns are
    /// dropped.
    pub fn in_cooldown(&mut self, path: &Path, now: Instant) -> bool {
        match self.cooldowns.get(path) {
            Some(until) if *until > now => true,
            Some(_) => {
                self.cooldowns.remove(path);
                false
            }
            None => false,
        }
    }

    /// Forget a path's failure, e.g. after a later decode succeeded.
    pub fn clear_cooldown(&mut self, path: &Path) {
        self.cooldowns.remove(path);
    }

    /// Cancel queued tasks matching `predicate` and hand them back. In-flight
    /// tasks are left alone.
    pub fn cancel_where(
        &mut self,
        mut predicate: impl FnMut(&PreloadTask) -> bool,
    ) -> Vec<PreloadTask> {
        let (mut cancelled, kept): (Vec<PreloadTask>, Vec<PreloadTask>) =
            self.queue.drain(..).partition(|task| predicate(task));
        self.queue = VecDeque::from(kept);
        for task in &mut cancelled {
            task.status = TaskStatus::Cancelled;
            debug!(id = task.id, path = %task.path.display(), "Cancelled prefetch");
        }
        self.stats.total_cancelled += cancelled.len() as u64;
        cancelled
    }

    /// Cancel every queued task.
    pub fn cancel_all(&mut self) -> usize {
        self.cancel_where(|_| true).len()
    }

    /// Cancel the queued task for a path.
    pub fn cancel_path(&mut self, path: &Path) -> bool {
        !self.cancel_where(|task| &*task.path == path).is_empty()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_queued(&self, path: &Path) -> bool {
        self.queue.iter().any(|task| &*task.path == path)
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.values().any(|task| &*task.path == path)
    }

    /// Number of pending tasks.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Number of in-flight decodes.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            paused: self.paused,
            ..self.stats.clone()
        }
    }
}
