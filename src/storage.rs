//! Object store access.
//!
//! The pipeline needs exactly two operations from storage: download one
//! object to a local file, and upload a local file under a bucket/key with a
//! set of attributes, optionally through a region-specific endpoint. The
//! [`ObjectStore`] trait captures that; the rest of the crate never sees a
//! concrete store.
//!
//! [`FsObjectStore`] is the bundled implementation. It maps buckets to
//! directories under a root, which is what the CLI and the integration
//! tests run against:
//!
//! ```text
//! <root>/
//! ├── photos/                         # bucket
//! │   └── uploads/cats/fluffy.jpg     # key
//! └── .attributes/
//!     └── photos/uploads/cats/fluffy.jpg.json   # region + attributes of the last put
//! ```

use crate::attributes::Attributes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("invalid object location s3://{bucket}/{key}: {reason}")]
    InvalidLocation {
        bucket: String,
        key: String,
        reason: &'static str,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store rejected request: {0}")]
    Rejected(String),
}

/// Destination and payload of one upload.
#[derive(Debug, Clone, Copy)]
pub struct PutRequest<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    /// Region-scoped endpoint to use instead of the default one.
    pub region: Option<&'a str>,
    pub source: &'a Path,
    pub attributes: &'a Attributes,
}

/// Storage collaborator used by the pipeline.
///
/// `Sync` because uploads may run on several rayon workers at once.
pub trait ObjectStore: Sync {
    /// Download `bucket/key` into `dest`, returning the byte count.
    fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError>;

    /// Upload `request.source` with its attributes, returning the byte count.
    fn put(&self, request: &PutRequest<'_>) -> Result<u64, StorageError>;
}

/// What [`FsObjectStore`] records next to each uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

const ATTRIBUTES_DIR: &str = ".attributes";

/// Directory-backed object store.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `bucket/key`.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        check_location(bucket, key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn attributes_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        check_location(bucket, key)?;
        Ok(self
            .root
            .join(ATTRIBUTES_DIR)
            .join(bucket)
            .join(format!("{key}.json")))
    }

    /// Attributes recorded by the last `put` of `bucket/key`.
    pub fn read_attributes(&self, bucket: &str, key: &str) -> Result<StoredAttributes, StorageError> {
        let path = self.attributes_path(bucket, key)?;
        if !path.exists() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Reject locations that would escape the bucket directory.
fn check_location(bucket: &str, key: &str) -> Result<(), StorageError> {
    let invalid = |reason| StorageError::InvalidLocation {
        bucket: bucket.to_string(),
        key: key.to_string(),
        reason,
    };

    if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
        return Err(invalid("bad bucket name"));
    }
    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("key must be relative"));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(invalid("key has an empty, '.' or '..' segment"));
    }
    Ok(())
}

impl ObjectStore for FsObjectStore {
    fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let path = self.object_path(bucket, key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(fs::copy(path, dest)?)
    }

    fn put(&self, request: &PutRequest<'_>) -> Result<u64, StorageError> {
        let path = self.object_path(request.bucket, request.key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let written = fs::copy(request.source, &path)?;

        let sidecar = self.attributes_path(request.bucket, request.key)?;
        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredAttributes {
            region: request.region.map(str::to_string),
            attributes: request.attributes.clone(),
        };
        fs::write(sidecar, serde_json::to_string_pretty(&stored)?)?;
        Ok(written)
    }
}
