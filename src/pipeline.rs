//! Per-output pipeline.
//!
//! Each resolved output of a matched rule runs through four stages:
//!
//! ```text
//! VALIDATE → RESIZE → OPTIMIZE → UPLOAD → done
//!     └──────────┴─────────┴──────────┴──→ failed (OutputError)
//! ```
//!
//! - **Validate**: `width` must be present and positive. Nothing is written
//!   before this passes.
//! - **Resize**: [`apply_resize`] into a temporary file that keeps the
//!   source's extension, so the encoder produces the source format.
//! - **Optimize**: in place on that temporary file.
//! - **Upload**: attributes filtered and completed, then written to the
//!   output's bucket/key (through its region, if set) with bounded retry.
//!
//! The temporary file is removed when the stage function returns, whichever
//! way it returns.

use crate::attributes::upload_attributes;
use crate::imaging::{
    BackendError, ImageBackend, OptimizeParams, Quality, ResizeOutcome, apply_resize,
};
use crate::retry::{RetryPolicy, with_retry};
use crate::rules::ResolvedOutput;
use crate::storage::{ObjectStore, PutRequest, StorageError};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Failure of one output. Never affects sibling outputs.
#[derive(Error, Debug)]
pub enum OutputError {
    /// Output is misconfigured (e.g. missing width).
    #[error("configuration error: {0}")]
    Config(String),
    /// Decode, resize or optimize failed.
    #[error("transform failed: {0}")]
    Transform(#[from] BackendError),
    /// Every upload attempt failed; carries the last error.
    #[error("upload failed after {attempts} attempt(s): {source}")]
    Upload {
        attempts: u32,
        #[source]
        source: StorageError,
    },
    /// Local scratch file could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutputError {
    /// Short classification used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            OutputError::Config(_) => "config",
            OutputError::Transform(_) => "transform",
            OutputError::Upload { .. } => "upload",
            OutputError::Io(_) => "io",
        }
    }
}

/// Collaborators and settings shared by every output of an invocation.
pub struct OutputContext<'a, B, S> {
    pub backend: &'a B,
    pub store: &'a S,
    pub retry: &'a RetryPolicy,
    pub jpeg_quality: Quality,
}

/// What a successful output produced.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: String,
    pub region: Option<String>,
    pub resize: ResizeOutcome,
    pub bytes: u64,
    pub attempts: u32,
}

/// The `width` of an output, or why it is unusable.
pub fn validate_width(output: &ResolvedOutput) -> Result<u32, OutputError> {
    match output.width {
        None => Err(OutputError::Config(format!(
            "output {} has no width",
            output.key_template
        ))),
        Some(0) => Err(OutputError::Config(format!(
            "output {} has width 0",
            output.key_template
        ))),
        Some(width) => Ok(width),
    }
}

/// Run one output from the downloaded `source` file to its upload.
pub fn run_output<B, S>(
    ctx: &OutputContext<'_, B, S>,
    source: &Path,
    output: &ResolvedOutput,
) -> Result<UploadReceipt, OutputError>
where
    B: ImageBackend,
    S: ObjectStore,
{
    let width = validate_width(output)?;

    let suffix = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let resized = tempfile::Builder::new()
        .prefix("img-fanout-")
        .suffix(&suffix)
        .tempfile()?;

    let resize = apply_resize(ctx.backend, source, output.policy, width, resized.path())?;
    debug!(key = %output.key, outcome = ?resize, "resized");

    ctx.backend.optimize(&OptimizeParams {
        path: resized.path().to_path_buf(),
        jpeg_quality: ctx.jpeg_quality,
    })?;
    debug!(key = %output.key, "optimized");

    let local_name = resized.path().to_string_lossy();
    let attributes = upload_attributes(output.attributes.as_ref(), &output.key, &local_name);
    info!(
        bucket = %output.bucket,
        key = %output.key,
        region = output.region.as_deref().unwrap_or("default"),
        attributes = ?attributes,
        "uploading"
    );

    let request = PutRequest {
        bucket: &output.bucket,
        key: &output.key,
        region: output.region.as_deref(),
        source: resized.path(),
        attributes: &attributes,
    };
    let (bytes, attempts) = with_retry(ctx.retry, "upload", || ctx.store.put(&request)).map_err(
        |e| OutputError::Upload {
            attempts: e.attempts,
            source: e.last_error,
        },
    )?;
    info!(bucket = %output.bucket, key = %output.key, bytes, attempts, "uploaded");

    Ok(UploadReceipt {
        bucket: output.bucket.clone(),
        key: output.key.clone(),
        region: output.region.clone(),
        resize,
        bytes,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeValue, Attributes, CONTENT_TYPE};
    use crate::imaging::backend::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::ResizePolicy;
    use crate::storage::tests::MemoryStore;
    use crate::test_helpers::resolved;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn source_file(tmp: &TempDir, name: &str) -> PathBuf {
        let path = tmp.path().join(name);
        std::fs::write(&path, "source-bytes").unwrap();
        path
    }

    fn ctx<'a>(
        backend: &'a MockBackend,
        store: &'a MemoryStore,
        retry: &'a RetryPolicy,
    ) -> OutputContext<'a, MockBackend, MemoryStore> {
        OutputContext {
            backend,
            store,
            retry,
            jpeg_quality: Quality::new(70),
        }
    }

    #[test]
    fn runs_all_stages_in_order() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::new();
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(10);

        let receipt = run_output(
            &ctx(&backend, &store, &retry),
            &source,
            &resolved("out", "thumbs/a.jpg", Some(200)),
        )
        .unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.resize, ResizeOutcome::Resized { width: 200 });
        assert_eq!(store.stored("out", "thumbs/a.jpg").unwrap(), b"resized:200");

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 2);
        let RecordedOp::Resize { output, .. } = &ops[0] else {
            panic!("expected resize first, got {ops:?}");
        };
        assert!(output.ends_with(".jpg"), "temp file keeps extension: {output}");
        assert!(matches!(&ops[1], RecordedOp::Optimize { quality: 70, .. }));
    }

    #[test]
    fn temp_file_is_removed_after_success() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.png");
        let backend = MockBackend::new();
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(1);

        run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.png", Some(5))).unwrap();

        let RecordedOp::Resize { output, .. } = &backend.get_operations()[0] else {
            panic!("expected resize");
        };
        assert!(!Path::new(output).exists());
    }

    #[test]
    fn temp_file_is_removed_after_upload_failure() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.png");
        let backend = MockBackend::new();
        let store = MemoryStore::new().failing("k.png", u32::MAX);
        let retry = RetryPolicy::immediate(2);

        let result = run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.png", Some(5)));
        assert!(result.is_err());

        let RecordedOp::Resize { output, .. } = &backend.get_operations()[0] else {
            panic!("expected resize");
        };
        assert!(!Path::new(output).exists());
    }

    #[test]
    fn temp_file_is_removed_after_transform_failure() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.png");
        let backend = MockBackend {
            fail_optimize_matching: Some("img-fanout-".into()),
            ..Default::default()
        };
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(2);

        let err = run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.png", Some(5)))
            .unwrap_err();
        assert!(matches!(err, OutputError::Transform(_)));

        let RecordedOp::Resize { output, .. } = &backend.get_operations()[0] else {
            panic!("expected resize");
        };
        assert!(!Path::new(output).exists());
        assert!(store.stored("o", "k.png").is_none());
    }

    #[test]
    fn missing_width_fails_before_any_work() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::new();
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(10);

        let err = run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.jpg", None))
            .unwrap_err();

        assert!(matches!(err, OutputError::Config(_)));
        assert_eq!(err.kind(), "config");
        assert!(backend.get_operations().is_empty());
        assert!(store.put_records().is_empty());
    }

    #[test]
    fn zero_width_is_config_error() {
        let output = resolved("o", "k.jpg", Some(0));
        assert!(matches!(validate_width(&output), Err(OutputError::Config(_))));
    }

    #[test]
    fn resize_failure_is_transform_error() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend {
            fail_resize: true,
            ..Default::default()
        };
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(10);

        let err = run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.jpg", Some(10)))
            .unwrap_err();

        assert!(matches!(err, OutputError::Transform(_)));
        assert!(store.put_records().is_empty());
    }

    #[test]
    fn optimize_failure_is_transform_error() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend {
            fail_optimize_matching: Some("img-fanout-".into()),
            ..Default::default()
        };
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(10);

        let err = run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.jpg", Some(10)))
            .unwrap_err();

        assert_eq!(err.kind(), "transform");
        assert!(store.put_records().is_empty());
    }

    #[test]
    fn only_shrink_identify_failure_is_transform_error() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::new();
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(10);
        let mut output = resolved("o", "k.jpg", Some(10));
        output.policy = ResizePolicy::OnlyShrink;

        let err = run_output(&ctx(&backend, &store, &retry), &source, &output).unwrap_err();
        assert!(matches!(err, OutputError::Transform(_)));
    }

    #[test]
    fn only_shrink_pass_through_uploads_original_bytes() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 100,
            height: 100,
        }]);
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(10);
        let mut output = resolved("o", "k.jpg", Some(150));
        output.policy = ResizePolicy::OnlyShrink;

        let receipt = run_output(&ctx(&backend, &store, &retry), &source, &output).unwrap();

        assert_eq!(receipt.resize, ResizeOutcome::PassedThrough { native_width: 100 });
        assert_eq!(store.stored("o", "k.jpg").unwrap(), b"source-bytes");
        assert_eq!(backend.resize_count(), 0);
    }

    #[test]
    fn upload_retries_up_to_ceiling_then_fails() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::new();
        let store = MemoryStore::new().failing("k.jpg", u32::MAX);
        let retry = RetryPolicy::immediate(10);

        let err = run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.jpg", Some(10)))
            .unwrap_err();

        assert!(matches!(err, OutputError::Upload { attempts: 10, .. }));
        assert_eq!(store.attempts_for("k.jpg"), 10);
        // Resize and optimize ran once; only the upload was retried.
        assert_eq!(backend.get_operations().len(), 2);
    }

    #[test]
    fn upload_recovers_from_transient_failures() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::new();
        let store = MemoryStore::new().failing("k.jpg", 9);
        let retry = RetryPolicy::immediate(10);

        let receipt =
            run_output(&ctx(&backend, &store, &retry), &source, &resolved("o", "k.jpg", Some(10)))
                .unwrap();

        assert_eq!(receipt.attempts, 10);
        assert!(store.stored("o", "k.jpg").is_some());
    }

    #[test]
    fn upload_carries_filtered_attributes_and_region() {
        let tmp = TempDir::new().unwrap();
        let source = source_file(&tmp, "src.jpg");
        let backend = MockBackend::new();
        let store = MemoryStore::new();
        let retry = RetryPolicy::immediate(1);

        let mut raw = Attributes::new();
        raw.insert("ACL".into(), AttributeValue::from("public-read"));
        raw.insert("RandomKey".into(), AttributeValue::from("dropped"));
        let mut output = resolved("o", "thumbs/k.png", Some(10));
        output.attributes = Some(raw);
        output.region = Some("eu-central-1".into());

        run_output(&ctx(&backend, &store, &retry), &source, &output).unwrap();

        let put = &store.put_records()[0];
        assert_eq!(put.region.as_deref(), Some("eu-central-1"));
        assert_eq!(put.attributes["ACL"], AttributeValue::from("public-read"));
        assert_eq!(put.attributes[CONTENT_TYPE], AttributeValue::from("image/png"));
        assert!(!put.attributes.contains_key("RandomKey"));
    }
}
