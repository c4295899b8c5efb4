use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Edge length used for uploads; high resolution images slow down analysis I/O.
pub const UPLOAD_THUMBNAIL_SIZE: u32 = 350;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Downscales images and encodes them as inline PNG data URIs.
#[derive(Debug, Clone)]
pub struct ThumbnailService {
    thumbnail_size: u32,
}

impl ThumbnailService {
    pub fn new() -> Self {
        Self {
            thumbnail_size: UPLOAD_THUMBNAIL_SIZE,
        }
    }

    pub fn with_size(thumbnail_size: u32) -> Self {
        Self { thumbnail_size }
    }

    /// True when the extension belongs to a format the `image` crate knows.
    pub fn is_supported_format(path: &Path) -> bool {
        ImageFormat::from_path(path).is_ok()
    }

    /// Load `path`, fit it into a `size`×`size` box and return a data URI.
    pub fn to_data_uri(&self, path: &Path) -> Result<String, ThumbnailError> {
        if !path.is_file() {
            return Err(ThumbnailError::InvalidPath {
                path: path.to_string_lossy().to_string(),
            });
        }
        let img = image::open(path)?;
        self.encode_data_uri(&img)
    }

    pub fn encode_data_uri(&self, img: &DynamicImage) -> Result<String, ThumbnailError> {
        let thumb = img.thumbnail(self.thumbnail_size, self.thumbnail_size);

        let mut png = Cursor::new(Vec::new());
        thumb.write_to(&mut png, ImageFormat::Png)?;

        Ok(format!(
            "data:image/png;base64,{}",
            STANDARD.encode(png.into_inner())
        ))
    }
}

impl Default for ThumbnailService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_data_uri_is_downscaled_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_image(temp_dir.path(), "large.png", 800, 400);

        let service = ThumbnailService::with_size(100);
        let uri = service.to_data_uri(&path).unwrap();

        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }

    #[test]
    fn test_missing_file_is_invalid_path() {
        let temp_dir = TempDir::new().unwrap();
        let result = ThumbnailService::new().to_data_uri(&temp_dir.path().join("nope.jpg"));
        assert!(matches!(result, Err(ThumbnailError::InvalidPath { .. })));
    }

    #[test]
    fn test_supported_format_detection() {
        assert!(ThumbnailService::is_supported_format(Path::new("a.JPG")));
        assert!(ThumbnailService::is_supported_format(Path::new("b.png")));
        assert!(!ThumbnailService::is_supported_format(Path::new("notes.txt")));
        assert!(!ThumbnailService::is_supported_format(Path::new("README")));
    }
}
