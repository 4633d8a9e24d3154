//! Decode backend boundary.
//!
//! Decoding is an opaque, blocking, possibly slow and possibly failing
//! capability. The engine only sees [`DecodeBackend`]; decodes are pushed
//! onto tokio's blocking pool so they never stall the async workers.
//!
//! - [`image_backend`]: backend built on the `image` crate

pub mod image_backend;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path of an image in the navigable set.
pub type ImagePath = Arc<Path>;

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("Failed to decode {path}: {reason}")]
    Failed { path: PathBuf, reason: String },

    #[error("I/O error reading {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Unsupported image format: {0}")]
    Unsupported(PathBuf),

    #[error("Decode task for {0} panicked")]
    Panicked(PathBuf),
}

/// EXIF-style orientation reported by the backend. The engine carries it
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
}

/// A decoded image. The pixel buffer is reference counted, so clones handed
/// to callers share the allocation the cache owns.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Bytes,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

impl DecodedImage {
    pub fn new(pixels: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            pixels: pixels.into(),
            width,
            height,
            orientation: Orientation::Normal,
        }
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Produces decoded pixel buffers for image paths.
///
/// Implementations block; callers run them through [`decode_blocking`].
pub trait DecodeBackend: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError>;
}

/// Run a decode on the blocking pool.
pub async fn decode_blocking(
    backend: Arc<dyn DecodeBackend>,
    path: ImagePath,
) -> Result<DecodedImage, DecodeError> {
    let task_path = path.clone();
    match tokio::task::spawn_blocking(move || backend.decode(&task_path)).await {
        Ok(result) => result,
        Err(_) => Err(DecodeError::Panicked(path.to_path_buf())),
    }
}
