//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Height that keeps the source aspect ratio at `target_width`.
///
/// Never returns 0, so very wide sources still produce a 1px-tall image.
///
/// # Examples
/// ```
/// # use img_fanout::imaging::scaled_height;
/// // 2000x1500 → width 1000 → 750
/// assert_eq!(scaled_height((2000, 1500), 1000), 750);
///
/// // Upscaling keeps the ratio too: 100x50 → width 150 → 75
/// assert_eq!(scaled_height((100, 50), 150), 75);
/// ```
pub fn scaled_height(source: (u32, u32), target_width: u32) -> u32 {
    let (src_w, src_h) = source;
    if src_w == 0 {
        return src_h.max(1);
    }
    let h = (src_h as f64 * target_width as f64 / src_w as f64).round() as u32;
    h.max(1)
}

/// Bytes per pixel of the `f32` RGBA buffer the resampler works in.
const RESAMPLE_BYTES_PER_PIXEL: u64 = 16;

/// Peak buffer size, in bytes, of a two-pass resize from `source` to
/// `target`: the larger of the vertical pass buffer (source width by target
/// height, in `f32` RGBA) and the encoded-ready output buffer.
///
/// `None` when the size does not fit in a `u64`.
///
/// ```
/// # use img_fanout::imaging::resize_buffer_bytes;
/// // 1000x800 → 200x160 RGB: the vertical pass dominates
/// assert_eq!(resize_buffer_bytes((1000, 800), (200, 160), 3), Some(2_560_000));
///
/// // 2x40000 → 20000 wide RGBA: a 32 TB output buffer
/// assert_eq!(
///     resize_buffer_bytes((2, 40_000), (20_000, 400_000_000), 4),
///     Some(32_000_000_000_000)
/// );
/// ```
pub fn resize_buffer_bytes(
    source: (u32, u32),
    target: (u32, u32),
    output_bytes_per_pixel: u64,
) -> Option<u64> {
    let intermediate = u64::from(source.0)
        .checked_mul(u64::from(target.1))?
        .checked_mul(RESAMPLE_BYTES_PER_PIXEL)?;
    let output = u64::from(target.0)
        .checked_mul(u64::from(target.1))?
        .checked_mul(output_bytes_per_pixel)?;
    Some(intermediate.max(output))
}

/// Whether an `ONLY_SHRINK` output must be resized.
///
/// A target at least as wide as the source is served by the original bytes.
pub fn shrink_required(native_width: u32, target_width: u32) -> bool {
    target_width < native_width
}
