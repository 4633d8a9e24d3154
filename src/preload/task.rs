//! Prefetch task descriptors.

use crate::cache::NavigationDirection;
use crate::decode::ImagePath;

pub type TaskId = u64;

/// Queue priority of a prefetch.
///
/// The displayed image never waits in the queue: it is decoded on the
/// requesting caller's path and so outranks both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Two or more steps away.
    Deep,
    /// Directly adjacent to the current position.
    Neighbor,
}

impl TaskPriority {
    pub fn for_distance(distance: usize) -> Self {
        if distance <= 1 {
            TaskPriority::Neighbor
        } else {
            TaskPriority::Deep
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

/// A scheduled decode of one image. Holds no pixels.
#[derive(Debug, Clone)]
pub struct PreloadTask {
    pub id: TaskId,
    pub path: ImagePath,
    /// Position in the navigable set.
    pub index: usize,
    /// Navigation direction the task was scheduled for.
    pub direction: NavigationDirection,
    pub priority: TaskPriority,
    /// Steps from the position at scheduling time.
    pub distance: usize,
    pub attempts: u32,
    pub status: TaskStatus,
}

impl PreloadTask {
    pub fn new(
        path: ImagePath,
        index: usize,
        direction: NavigationDirection,
        distance: usize,
    ) -> Self {
        Self {
            id: 0,
            path,
            index,
            direction,
            priority: TaskPriority::for_distance(distance),
            distance,
            attempts: 0,
            status: TaskStatus::Queued,
        }
    }
}
