//! Decode backend built on the `image` crate.
//!
//! Produces tightly packed RGBA8 buffers. Orientation metadata is not read
//! here; images are reported as [`Orientation::Normal`].

use std::path::Path;

use image::ImageReader;
use tracing::debug;

use super::{DecodeBackend, DecodeError, DecodedImage, Orientation};

/// File extensions the catalog treats as images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "ico", "tga", "qoi",
];

/// Decodes files from disk into RGBA8.
#[derive(Debug, Default, Clone)]
pub struct ImageCrateBackend;

impl ImageCrateBackend {
    pub fn new() -> Self {
        Self
    }

    /// Whether a path carries one of the [`SUPPORTED_EXTENSIONS`].
    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                SUPPORTED_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }
}

impl DecodeBackend for ImageCrateBackend {
    fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| DecodeError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if reader.format().is_none() {
            return Err(DecodeError::Unsupported(path.to_path_buf()));
        }

        let image = reader.decode().map_err(|e| DecodeError::Failed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba.into_raw();

        debug!(
            path = %path.display(),
            width,
            height,
            bytes = pixels.len(),
            "Decoded image"
        );

        Ok(DecodedImage {
            pixels: pixels.into(),
            width,
            height,
            orientation: Orientation::Normal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(ImageCrateBackend::supports(Path::new("a/b/photo.JPG")));
        assert!(ImageCrateBackend::supports(Path::new("x.webp")));
        assert!(!ImageCrateBackend::supports(Path::new("notes.txt")));
        assert!(!ImageCrateBackend::supports(Path::new("no_extension")));
    }

    #[test]
    fn test_decode_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let decoded = ImageCrateBackend::new().decode(&path).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.byte_size(), 3 * 2 * 4);
        assert_eq!(&decoded.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ImageCrateBackend::new()
            .decode(Path::new("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }

    #[test]
    fn test_garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"this is not an image").unwrap();
        assert!(ImageCrateBackend::new().decode(&path).is_err());
    }
}
