//! Shared test utilities for the img-fanout test suite.
//!
//! Provides synthetic image writers and terse builders for rule
//! configuration, so tests can state only what they care about.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let rules = RuleSet::compile(&[rule(
//!     "photos",
//!     r"uploads/(\w+)\.jpg",
//!     vec![output("thumbs/{0}.jpg", Some(200))],
//! )])
//! .unwrap();
//! ```

use std::path::Path;

use image::{ImageEncoder, Rgb, RgbImage, Rgba, RgbaImage};

use crate::config::{OutputConfig, RuleConfig};
use crate::imaging::ResizePolicy;
use crate::rules::ResolvedOutput;

// =========================================================================
// Synthetic images
// =========================================================================

/// Write a gradient JPEG with the given dimensions.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    image::codecs::jpeg::JpegEncoder::new(std::io::BufWriter::new(file))
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write a PNG with an alpha channel and the given dimensions.
pub fn write_test_png(path: &Path, width: u32, height: u32) {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, 64, (y % 256) as u8, 200])
    });
    let file = std::fs::File::create(path).unwrap();
    image::codecs::png::PngEncoder::new(std::io::BufWriter::new(file))
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
}

// =========================================================================
// Configuration builders
// =========================================================================

/// A complete rule on `bucket` with `pattern`.
pub fn rule(bucket: &str, pattern: &str, outputs: Vec<OutputConfig>) -> RuleConfig {
    RuleConfig {
        bucket: Some(bucket.to_string()),
        key_regexp: Some(pattern.to_string()),
        outputs,
    }
}

/// An output writing `key` into the source bucket with the default policy.
pub fn output(key: &str, width: Option<u32>) -> OutputConfig {
    OutputConfig {
        key: key.to_string(),
        width,
        ..Default::default()
    }
}

/// An already-resolved output, for driving the per-output pipeline directly.
pub fn resolved(bucket: &str, key: &str, width: Option<u32>) -> ResolvedOutput {
    ResolvedOutput {
        bucket: bucket.to_string(),
        key: key.to_string(),
        key_template: key.to_string(),
        width,
        policy: ResizePolicy::Default,
        region: None,
        attributes: None,
    }
}
