//! Directory listing into the navigable image sequence.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::decode::image_backend::ImageCrateBackend;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
}

/// List the images directly inside `dir`, sorted by file name.
///
/// Subdirectories and files without a supported image extension are
/// skipped.
pub async fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let meta = tokio::fs::metadata(dir).await.map_err(io_err)?;
    if !meta.is_dir() {
        return Err(CatalogError::NotADirectory(dir.to_path_buf()));
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut images = Vec::new();
    let mut skipped = 0usize;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_file = entry.file_type().await.map_err(io_err)?.is_file();
        if is_file && ImageCrateBackend::supports(&path) {
            images.push(path);
        } else {
            skipped += 1;
        }
    }
    images.sort();

    debug!(skipped, "Skipped non-image entries");
    info!(dir = %dir.display(), images = images.len(), "Catalog listed");
    Ok(images)
}
