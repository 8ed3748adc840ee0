//! Image processing, pure Rust and statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Resize** | Lanczos3, width-driven, aspect preserved |
//! | **Optimize** | JPEG re-encode / PNG best-compression, kept only if smaller |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Policy**: [`ResizePolicy`] and [`apply_resize`], deciding whether a
//!   resize happens at all

pub mod backend;
mod calculations;
mod params;
pub mod policy;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{resize_buffer_bytes, scaled_height, shrink_required};
pub use params::{OptimizeParams, Quality, ResizeParams};
pub use policy::{ResizeOutcome, ResizePolicy, apply_resize};
pub use rust_backend::RustBackend;
