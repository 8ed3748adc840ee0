//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::into_dimensions` (header only, content-sniffed) |
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image::ImageReader` with content sniffing |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Optimize JPEG | re-encode with `JpegEncoder` at the configured quality |
//! | Optimize PNG | lossless re-encode with `CompressionType::Best` + adaptive filtering |
//!
//! Optimization only replaces the file when the re-encoded bytes are smaller.
//! Formats without an optimizer are left untouched.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{resize_buffer_bytes, scaled_height};
use super::params::{OptimizeParams, ResizeParams};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

/// Largest buffer a single resize may allocate. Beyond this the resize is
/// refused instead of letting the allocation abort the process.
pub const MAX_RESIZE_BYTES: u64 = 1 << 30;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk, sniffing the format from content.
fn load_image(path: &Path) -> Result<(DynamicImage, Option<ImageFormat>), BackendError> {
    let reader = ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?;
    let format = reader.format();
    let img = reader.decode().map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
    })?;
    Ok((img, format))
}

/// Output format: the path's extension, else the source's sniffed format.
fn output_format(path: &Path, fallback: Option<ImageFormat>) -> Result<ImageFormat, BackendError> {
    ImageFormat::from_path(path)
        .ok()
        .or(fallback)
        .ok_or_else(|| {
            BackendError::ProcessingFailed(format!(
                "Cannot determine output format for {}",
                path.display()
            ))
        })
}

/// JPEG has no alpha channel; flatten before encoding.
fn jpeg_compatible(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))?;
    Ok(buf)
}

fn encode_png_best(img: &DynamicImage) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
    img.write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("PNG encode failed: {}", e)))?;
    Ok(buf)
}

/// Save a resized image, inferring the format from the output path.
fn save_image(
    img: DynamicImage,
    path: &Path,
    fallback: Option<ImageFormat>,
) -> Result<(), BackendError> {
    let format = output_format(path, fallback)?;
    let img = if format == ImageFormat::Jpeg {
        jpeg_compatible(img)
    } else {
        img
    };

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to encode {}: {}", path.display(), e))
    })?;
    std::fs::write(path, buf.into_inner())?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        // Temporary files may lack an extension, so sniff the content.
        let (width, height) = ImageReader::open(path)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| {
                BackendError::ProcessingFailed(format!(
                    "Failed to read dimensions of {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Dimensions { width, height })
    }

    fn resize(&self, params: &ResizeParams) -> Result<(), BackendError> {
        if params.width == 0 {
            return Err(BackendError::ProcessingFailed(
                "Resize width must be positive".into(),
            ));
        }
        let (img, format) = load_image(&params.source)?;
        let height = scaled_height((img.width(), img.height()), params.width);
        let bytes_per_pixel = u64::from(img.color().bytes_per_pixel());
        match resize_buffer_bytes((img.width(), img.height()), (params.width, height), bytes_per_pixel) {
            Some(bytes) if bytes <= MAX_RESIZE_BYTES => {}
            _ => {
                return Err(BackendError::ProcessingFailed(format!(
                    "Resizing {} to {}x{} exceeds the {} byte buffer limit",
                    params.source.display(),
                    params.width,
                    height,
                    MAX_RESIZE_BYTES
                )));
            }
        }
        let resized = img.resize_exact(params.width, height, FilterType::Lanczos3);
        save_image(resized, &params.output, format)
    }

    fn optimize(&self, params: &OptimizeParams) -> Result<(), BackendError> {
        let (img, format) = load_image(&params.path)?;
        let original_len = std::fs::metadata(&params.path)?.len();

        let optimized = match format {
            Some(ImageFormat::Jpeg) => {
                encode_jpeg(&jpeg_compatible(img), params.jpeg_quality.value() as u8)?
            }
            Some(ImageFormat::Png) => encode_png_best(&img)?,
            other => {
                tracing::debug!(path = %params.path.display(), format = ?other, "no optimizer for format");
                return Ok(());
            }
        };

        if (optimized.len() as u64) < original_len {
            tracing::debug!(
                path = %params.path.display(),
                before = original_len,
                after = optimized.len(),
                "optimized"
            );
            std::fs::write(&params.path, optimized)?;
        }
        Ok(())
    }
}
