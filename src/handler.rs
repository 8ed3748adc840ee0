//! Event orchestration.
//!
//! One invocation of [`Engine::handle`] processes one storage event:
//!
//! 1. Take the bucket and decoded key of the first record.
//! 2. Find every matching rule. No match is not an error: the event is
//!    logged and nothing is downloaded.
//! 3. Download the source object once, into a temporary file that keeps the
//!    key's extension. Every output of every matching rule reads that copy.
//! 4. Run each output through [`run_output`]. A failing output never stops
//!    the others; all of them are attempted.
//! 5. Succeed only if every output succeeded. Otherwise fail with an
//!    [`AggregateError`] listing every failure in rule/output order.
//!
//! With `parallel_outputs` enabled the outputs run on the rayon pool. Results
//! are collected in job order, so reports and failures come out in the same
//! order either way.

use crate::config::{ConfigError, PipelineConfig};
use crate::event::{EventError, ObjectRef, StorageEvent};
use crate::imaging::{ImageBackend, Quality};
use crate::pipeline::{OutputContext, OutputError, UploadReceipt, run_output};
use crate::retry::RetryPolicy;
use crate::rules::{ResolvedOutput, RuleSet};
use crate::storage::{ObjectStore, StorageError};
use crate::template::TemplateError;
use rayon::prelude::*;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum HandleError {
    #[error("invalid event: {0}")]
    Event(#[from] EventError),
    #[error("output key could not be resolved: {0}")]
    Template(#[from] TemplateError),
    #[error("failed to fetch s3://{bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    OutputsFailed(#[from] AggregateError),
}

/// Identifies one output within an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLabel {
    /// Position of the rule in configuration.
    pub rule_index: usize,
    /// Position of the output within its rule.
    pub output_index: usize,
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for OutputLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule #{} output #{} (s3://{}/{})",
            self.rule_index, self.output_index, self.bucket, self.key
        )
    }
}

#[derive(Debug)]
pub struct OutputFailure {
    pub label: OutputLabel,
    pub error: OutputError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedOutput {
    pub label: OutputLabel,
    pub receipt: UploadReceipt,
}

/// One or more outputs of an event failed.
#[derive(Debug)]
pub struct AggregateError {
    pub object: ObjectRef,
    /// Number of outputs attempted, failed or not.
    pub attempted: usize,
    /// Failures in rule/output order.
    pub failures: Vec<OutputFailure>,
    /// Outputs that went through despite the failures.
    pub completed: Vec<CompletedOutput>,
}

impl AggregateError {
    /// The failure surfaced as the invocation's error: the last one.
    pub fn representative(&self) -> Option<&OutputFailure> {
        self.failures.last()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} output(s) for s3://{}/{} failed",
            self.failures.len(),
            self.attempted,
            self.object.bucket,
            self.object.key
        )?;
        if let Some(last) = self.representative() {
            write!(f, "; last: {}: {}", last.label, last.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.representative()
            .map(|f| &f.error as &(dyn std::error::Error + 'static))
    }
}

/// Result of an invocation in which no output failed.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleReport {
    pub object: ObjectRef,
    /// Indices of the rules that matched, in order.
    pub matched_rules: Vec<usize>,
    pub completed: Vec<CompletedOutput>,
}

impl HandleReport {
    pub fn is_no_match(&self) -> bool {
        self.matched_rules.is_empty()
    }
}

/// Compiled rules plus the collaborators they run against.
pub struct Engine<B, S> {
    rules: RuleSet,
    backend: B,
    store: S,
    retry: RetryPolicy,
    jpeg_quality: Quality,
    parallel: bool,
}

impl<B: ImageBackend, S: ObjectStore> Engine<B, S> {
    /// Engine with default retry and optimization settings, running outputs
    /// sequentially.
    pub fn new(rules: RuleSet, backend: B, store: S) -> Self {
        Self {
            rules,
            backend,
            store,
            retry: RetryPolicy::default(),
            jpeg_quality: Quality::default(),
            parallel: false,
        }
    }

    /// Compile the rules of `config` and take over its settings.
    pub fn from_config(config: &PipelineConfig, backend: B, store: S) -> Result<Self, ConfigError> {
        let rules = RuleSet::compile(&config.rules)?;
        Ok(Self::new(rules, backend, store)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_jpeg_quality(Quality::new(config.optimize.jpeg_quality))
            .with_parallel(config.processing.parallel_outputs))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: Quality) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one storage event.
    pub fn handle(&self, event: &StorageEvent) -> Result<HandleReport, HandleError> {
        let object = event.object()?;
        self.handle_object(object)
    }

    /// Process one stored object, as if an event for it had arrived.
    pub fn handle_object(&self, object: ObjectRef) -> Result<HandleReport, HandleError> {
        info!(bucket = %object.bucket, key = %object.key, "handling object");

        let matches = self.rules.matches(&object.bucket, &object.key)?;
        if matches.is_empty() {
            warn!(bucket = %object.bucket, key = %object.key, "no rule matches object");
            return Ok(HandleReport {
                object,
                matched_rules: Vec::new(),
                completed: Vec::new(),
            });
        }

        let matched_rules: Vec<usize> = matches.iter().map(|m| m.rule_index).collect();
        let jobs: Vec<(OutputLabel, &ResolvedOutput)> = matches
            .iter()
            .flat_map(|m| {
                m.outputs.iter().enumerate().map(|(output_index, output)| {
                    let label = OutputLabel {
                        rule_index: m.rule_index,
                        output_index,
                        bucket: output.bucket.clone(),
                        key: output.key.clone(),
                    };
                    (label, output)
                })
            })
            .collect();
        info!(rules = ?matched_rules, outputs = jobs.len(), "rules matched");

        let source = self.fetch_source(&object)?;

        let ctx = OutputContext {
            backend: &self.backend,
            store: &self.store,
            retry: &self.retry,
            jpeg_quality: self.jpeg_quality,
        };
        let run = |(label, output): &(OutputLabel, &ResolvedOutput)| {
            run_output(&ctx, source.path(), output).map_err(|error| {
                error!(
                    source_bucket = %object.bucket,
                    source_key = %object.key,
                    output = %label,
                    key_template = %output.key_template,
                    width = ?output.width,
                    policy = %output.policy,
                    kind = error.kind(),
                    error = %error,
                    "output failed"
                );
                error
            })
        };
        let results: Vec<Result<UploadReceipt, OutputError>> = if self.parallel {
            jobs.par_iter().map(run).collect()
        } else {
            jobs.iter().map(run).collect()
        };

        let attempted = jobs.len();
        let mut completed = Vec::new();
        let mut failures = Vec::new();
        for ((label, _), result) in jobs.into_iter().zip(results) {
            match result {
                Ok(receipt) => completed.push(CompletedOutput { label, receipt }),
                Err(error) => failures.push(OutputFailure { label, error }),
            }
        }

        if failures.is_empty() {
            info!(outputs = completed.len(), "all outputs completed");
            Ok(HandleReport {
                object,
                matched_rules,
                completed,
            })
        } else {
            Err(AggregateError {
                object,
                attempted,
                failures,
                completed,
            }
            .into())
        }
    }

    fn fetch_source(&self, object: &ObjectRef) -> Result<tempfile::NamedTempFile, HandleError> {
        let suffix = Path::new(&object.key)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let file = tempfile::Builder::new()
            .prefix("img-fanout-src-")
            .suffix(&suffix)
            .tempfile()?;

        let bytes = self
            .store
            .fetch(&object.bucket, &object.key, file.path())
            .map_err(|source| HandleError::Fetch {
                bucket: object.bucket.clone(),
                key: object.key.clone(),
                source,
            })?;
        info!(bucket = %object.bucket, key = %object.key, bytes, "fetched source");
        Ok(file)
    }
}
