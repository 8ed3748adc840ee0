//! Rule configuration.
//!
//! Handles loading and validating the TOML rule file. The engine itself
//! treats configuration as an already-parsed list of [`RuleConfig`] records;
//! this module is what turns a file on disk into that list.
//!
//! ## Configuration File
//!
//! ```toml
//! # All sections except [[rules]] are optional - defaults shown below
//!
//! [retry]
//! max_attempts = 10          # Total upload attempts per output
//! initial_backoff_ms = 100   # Delay before the second attempt
//! max_backoff_ms = 5000      # Backoff ceiling
//! multiplier = 2.0           # Exponential growth factor
//!
//! [processing]
//! parallel_outputs = false   # Run output pipelines on a worker pool
//! max_processes = 4          # Max parallel workers (omit for auto = CPU cores)
//!
//! [optimize]
//! jpeg_quality = 85          # Re-encode quality for JPEG outputs (1-100)
//!
//! [[rules]]
//! bucket = "photos"
//! key_regexp = '^uploads/(\w+)/(\w+)\.jpg$'
//!
//! [[rules.outputs]]
//! key = "thumbs/{0}/{1}.jpg"
//! width = 200
//! policy = "ONLY_SHRINK"
//! ```
//!
//! Unknown keys are rejected to catch typos early, except inside an output's
//! `attr` table: attributes are free-form here and filtered against an
//! allow-list right before upload (see [`crate::attributes`]).
//!
//! Rules missing `bucket`, `key_regexp` or `outputs` load fine and simply never
//! match. A `width` may also be absent; that output then fails on its own when
//! a matching object arrives, without affecting its siblings.

use crate::attributes::Attributes;
use crate::imaging::ResizePolicy;
use crate::template::TemplateError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("rule #{rule}: invalid key_regexp: {source}")]
    InvalidPattern {
        rule: usize,
        #[source]
        source: regex::Error,
    },
    #[error("rule #{rule}, output #{output}: {source}")]
    Template {
        rule: usize,
        output: usize,
        #[source]
        source: TemplateError,
    },
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Upload retry settings.
    pub retry: RetryConfig,
    /// Fan-out execution settings.
    pub processing: ProcessingConfig,
    /// Optimization settings applied to every resized image.
    pub optimize: OptimizeConfig,
    /// Routing rules, matched in order.
    pub rules: Vec<RuleConfig>,
}

impl PipelineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::Validation(
                "retry.max_backoff_ms must be >= retry.initial_backoff_ms".into(),
            ));
        }
        if !(1..=100).contains(&self.optimize.jpeg_quality) {
            return Err(ConfigError::Validation(
                "optimize.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// One routing rule: a source bucket, a key pattern, and the outputs derived
/// from every matching object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Source bucket this rule applies to (exact match).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Pattern matched from the start of the object key. Its capture groups
    /// feed the output key templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_regexp: Option<String>,
    /// Derived images to produce, in order.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// One configured derived image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Target bucket; the source bucket when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Output key template, e.g. `"thumbs/{0}.jpg"`.
    #[serde(alias = "key_template")]
    pub key: String,
    /// Target width in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default)]
    pub policy: ResizePolicy,
    /// Storage region override for the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Raw upload attributes (ACL, CacheControl, Metadata, ...).
    #[serde(default, alias = "attributes", skip_serializing_if = "Option::is_none")]
    pub attr: Option<Attributes>,
}

/// Upload retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Fan-out execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Run the output pipelines of one event concurrently.
    /// Off by default: outputs run one after another in rule order.
    pub parallel_outputs: bool,
    /// Maximum number of parallel workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Optimization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizeConfig {
    pub jpeg_quality: u32,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self { jpeg_quality: 85 }
    }
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented stock configuration file.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# img-fanout configuration
# ========================
#
# Every stored object whose bucket and key match a rule is resized once per
# output of that rule and uploaded to the output's bucket/key.

# ---------------------------------------------------------------------------
# Upload retries
# ---------------------------------------------------------------------------
[retry]
# Total attempts per upload, including the first.
max_attempts = 10
# Delay before the second attempt; doubles (x multiplier) up to the ceiling.
initial_backoff_ms = 100
max_backoff_ms = 5000
multiplier = 2.0

# ---------------------------------------------------------------------------
# Fan-out
# ---------------------------------------------------------------------------
[processing]
# Process the outputs of one event concurrently. Failures are still reported
# in rule/output order.
parallel_outputs = false
# Maximum worker threads (omit for one per CPU core).
# max_processes = 4

# ---------------------------------------------------------------------------
# Optimization
# ---------------------------------------------------------------------------
[optimize]
# Quality used when re-encoding JPEG outputs (1-100). PNG outputs are
# recompressed losslessly.
jpeg_quality = 85

# ---------------------------------------------------------------------------
# Rules
# ---------------------------------------------------------------------------
# key_regexp is matched from the start of the key. Output keys are templates:
# {0}, {1}, ... are the pattern's capture groups in order.
#
# policy:
#   DEFAULT      always resize to `width`
#   ONLY_SHRINK  copy the original through when it is already narrower
#
# attr: upload attributes. Only ACL, CacheControl, ContentDisposition,
# ContentEncoding, ContentLanguage, ContentLength, ContentMD5, ContentType,
# Expires, GrantFullControl, GrantRead, GrantReadACP, GrantWriteACP, Metadata,
# ServerSideEncryption, StorageClass, WebsiteRedirectLocation,
# SSECustomerAlgorithm, SSECustomerKey, SSEKMSKeyId and RequestPayer are
# passed on. ContentType/ContentEncoding are guessed from the output key when
# not given.

[[rules]]
bucket = "photos"
key_regexp = '^uploads/(\w+)/(\w+)\.(jpg|png)$'

[[rules.outputs]]
key = "thumbs/{0}/{1}-200.{2}"
width = 200
policy = "ONLY_SHRINK"

[[rules.outputs]]
bucket = "photos-public"
key = "large/{0}/{1}.{2}"
width = 1600
policy = "ONLY_SHRINK"
# region = "eu-west-1"

[rules.outputs.attr]
ACL = "public-read"
CacheControl = "max-age=86400"
Metadata = { origin = "img-fanout" }
"##
}
