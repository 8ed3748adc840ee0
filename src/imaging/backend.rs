//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three transforms the pipeline
//! relies on: identify (read the native size), resize, and optimize.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust, everything
//! statically linked into the binary.

use super::params::{OptimizeParams, ResizeParams};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Sync` because output pipelines may share one backend across rayon
/// workers.
pub trait ImageBackend: Sync {
    /// Decode enough of the image to report its dimensions.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Resize `params.source` to `params.width`, writing `params.output`.
    fn resize(&self, params: &ResizeParams) -> Result<(), BackendError>;

    /// Optimize the file at `params.path` in place.
    fn optimize(&self, params: &OptimizeParams) -> Result<(), BackendError>;
}
