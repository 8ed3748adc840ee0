//! Storage change notifications.
//!
//! The trigger is the JSON document an object store sends when an object is
//! written. Only the parts the pipeline uses are modeled:
//!
//! ```json
//! {
//!   "Records": [
//!     { "s3": { "bucket": { "name": "photos" },
//!               "object": { "key": "uploads/my+cat%21.jpg" } } }
//!   ]
//! }
//! ```
//!
//! Keys arrive form-encoded: `+` stands for a space and other bytes are
//! percent-escaped. [`decode_key`] reverses that and insists on UTF-8.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event has no records")]
    NoRecords,
    #[error("object key {raw:?} is not valid UTF-8 after percent-decoding")]
    InvalidKeyEncoding { raw: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "Records")]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntity {
    /// Form-encoded key, as delivered.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// The object an event is about, with the key decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl StorageEvent {
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build a single-record event for `bucket`/`key` (key given decoded).
    pub fn single(bucket: &str, key: &str) -> Self {
        Self {
            records: vec![EventRecord {
                s3: S3Entity {
                    bucket: BucketEntity {
                        name: bucket.to_string(),
                    },
                    object: ObjectEntity {
                        key: encode_key(key),
                        size: None,
                    },
                },
            }],
        }
    }

    /// Bucket and decoded key of the first record. Any further records are
    /// ignored.
    pub fn object(&self) -> Result<ObjectRef, EventError> {
        let record = self.records.first().ok_or(EventError::NoRecords)?;
        if self.records.len() > 1 {
            tracing::debug!(
                ignored = self.records.len() - 1,
                "event carries extra records; only the first is processed"
            );
        }
        Ok(ObjectRef {
            bucket: record.s3.bucket.name.clone(),
            key: decode_key(&record.s3.object.key)?,
        })
    }
}

/// Decode a form-encoded object key (`+` → space, `%XX` → byte, then UTF-8).
pub fn decode_key(raw: &str) -> Result<String, EventError> {
    let plus_decoded = raw.replace('+', " ");
    let bytes = urlencoding::decode_binary(plus_decoded.as_bytes());
    String::from_utf8(bytes.into_owned()).map_err(|_| EventError::InvalidKeyEncoding {
        raw: raw.to_string(),
    })
}

/// Inverse of [`decode_key`]: spaces become `+`, everything outside the
/// unreserved set and `/` is percent-encoded.
pub fn encode_key(key: &str) -> String {
    key.split(' ')
        .map(|part| {
            part.split('/')
                .map(|seg| urlencoding::encode(seg).into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect::<Vec<_>>()
        .join("+")
}
