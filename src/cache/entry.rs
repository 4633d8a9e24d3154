//! Cache entry types and navigation direction.
//!
//! An entry holds one decoded image. Entries are the unit of eviction: they
//! are inserted whole and dropped whole, releasing their pixel buffer.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::decode::{DecodedImage, ImagePath};

/// Which way the user is paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationDirection {
    Forward,
    Backward,
    #[default]
    Idle,
}

impl NavigationDirection {
    /// Index offset of one navigation step.
    pub fn step(&self) -> isize {
        match self {
            NavigationDirection::Forward => 1,
            NavigationDirection::Backward => -1,
            NavigationDirection::Idle => 0,
        }
    }

    /// The reverse direction (idle stays idle).
    pub fn opposite(&self) -> Self {
        match self {
            NavigationDirection::Forward => NavigationDirection::Backward,
            NavigationDirection::Backward => NavigationDirection::Forward,
            NavigationDirection::Idle => NavigationDirection::Idle,
        }
    }

    pub fn is_moving(&self) -> bool {
        !matches!(self, NavigationDirection::Idle)
    }
}

impl std::fmt::Display for NavigationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigationDirection::Forward => write!(f, "forward"),
            NavigationDirection::Backward => write!(f, "backward"),
            NavigationDirection::Idle => write!(f, "idle"),
        }
    }
}

/// The navigation direction that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionTag {
    Forward,
    Backward,
    Neutral,
}

impl From<NavigationDirection> for DirectionTag {
    fn from(direction: NavigationDirection) -> Self {
        match direction {
            NavigationDirection::Forward => DirectionTag::Forward,
            NavigationDirection::Backward => DirectionTag::Backward,
            NavigationDirection::Idle => DirectionTag::Neutral,
        }
    }
}

impl DirectionTag {
    /// Eviction pool of an entry with this tag while navigating `current`.
    ///
    /// Lower pools are drained first: entries behind the motion (0), then
    /// neutral ones (1), then entries ahead (2). While idle every entry
    /// shares pool 0.
    pub fn eviction_pool(&self, current: NavigationDirection) -> u8 {
        let ahead = DirectionTag::from(current);
        let behind = DirectionTag::from(current.opposite());
        match current {
            NavigationDirection::Idle => 0,
            _ if *self == behind => 0,
            _ if *self == ahead => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for DirectionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectionTag::Forward => write!(f, "forward"),
            DirectionTag::Backward => write!(f, "backward"),
            DirectionTag::Neutral => write!(f, "neutral"),
        }
    }
}

/// A resident decoded image.
#[derive(Debug)]
pub struct CacheEntry {
    /// Image path (the cache key).
    pub path: ImagePath,

    /// Decoded pixels. Owned by the cache, released on eviction.
    pub image: DecodedImage,

    /// Size of the pixel buffer in bytes.
    pub size: usize,

    /// Direction that produced this entry.
    pub direction: DirectionTag,

    /// Position on the cache's access clock. Strictly increasing, so two
    /// entries never share one.
    pub access_tick: u64,

    /// Number of hits on this entry.
    pub access_count: u64,

    /// When the decode that produced this entry started. A put carrying an
    /// older stamp than the resident entry loses.
    pub produced_at: Instant,
}

impl CacheEntry {
    pub fn new(
        path: ImagePath,
        image: DecodedImage,
        direction: DirectionTag,
        produced_at: Instant,
        access_tick: u64,
    ) -> Self {
        let size = image.byte_size();
        Self {
            path,
            image,
            size,
            direction,
            access_tick,
            access_count: 0,
            produced_at,
        }
    }

    /// Record a hit.
    pub fn touch(&mut self, tick: u64) {
        self.access_tick = tick;
        self.access_count += 1;
    }
}
