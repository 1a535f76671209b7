use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GenerationError, Result};

/// Default side length of the square conditioning canvas
pub const CONDITIONING_IMAGE_SIZE: u32 = 512;

/// Conditioning image ready for the image-to-video capability
#[derive(Debug, Clone)]
pub struct ConditioningImage {
    /// Where the image was loaded from
    pub source: PathBuf,
    /// Force-resized, alpha-free RGB pixels
    pub pixels: RgbImage,
}

impl ConditioningImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Encode the pixels as PNG
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut buf = std::io::Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| GenerationError::read(format!("Cannot encode conditioning image: {}", e)))?;
        Ok(buf.into_inner())
    }
}

/// Decode `path`, force-resize to `size`x`size` ignoring aspect ratio and drop
/// any alpha channel
pub async fn load_conditioning_image(path: &Path, size: u32) -> Result<ConditioningImage> {
    let source = path.to_path_buf();
    tokio::task::spawn_blocking(move || decode_and_fit(source, size))
        .await
        .map_err(|e| GenerationError::read(format!("Image decoding task failed: {}", e)))?
}

fn decode_and_fit(source: PathBuf, size: u32) -> Result<ConditioningImage> {
    let decoded = image::open(&source)
        .map_err(|e| GenerationError::read(format!("Cannot open image {}: {}", source.display(), e)))?;

    debug!(
        "Loaded conditioning image {} ({}x{}, {:?})",
        source.display(),
        decoded.width(),
        decoded.height(),
        decoded.color()
    );

    let pixels = decoded.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    Ok(ConditioningImage { source, pixels })
}
