//! Resize policies.
//!
//! | Policy | Behavior |
//! |---|---|
//! | `DEFAULT` | always resize to the target width |
//! | `ONLY_SHRINK` | identify the source; when it is not wider than the target, copy the original bytes through verbatim |
//!
//! `ONLY_SHRINK` avoids upscaling artifacts and skips the decode/encode cycle
//! for sources that are already small enough.

use super::backend::{BackendError, ImageBackend};
use super::calculations::shrink_required;
use super::params::ResizeParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResizePolicy {
    #[default]
    Default,
    OnlyShrink,
}

impl fmt::Display for ResizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResizePolicy::Default => f.write_str("DEFAULT"),
            ResizePolicy::OnlyShrink => f.write_str("ONLY_SHRINK"),
        }
    }
}

/// What [`apply_resize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Resized { width: u32 },
    /// The original was copied unchanged.
    PassedThrough { native_width: u32 },
}

/// Produce `output` from `source` according to `policy`.
///
/// Under `ONLY_SHRINK` a source that cannot be identified is an error; it is
/// never silently passed through.
pub fn apply_resize(
    backend: &impl ImageBackend,
    source: &Path,
    policy: ResizePolicy,
    width: u32,
    output: &Path,
) -> Result<ResizeOutcome, BackendError> {
    if policy == ResizePolicy::OnlyShrink {
        let native_width = backend.identify(source)?.width;
        if !shrink_required(native_width, width) {
            std::fs::copy(source, output)?;
            return Ok(ResizeOutcome::PassedThrough { native_width });
        }
    }

    backend.resize(&ResizeParams {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        width,
    })?;
    Ok(ResizeOutcome::Resized { width })
}
