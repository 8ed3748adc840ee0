//! # img-fanout
//!
//! Event-triggered image fan-out. When an object lands in storage, every
//! configured rule whose bucket and key pattern match it produces a set of
//! derived images: resized, optimized and uploaded to their own bucket/key.
//!
//! # Architecture: Fetch Once, Fan Out
//!
//! ```text
//! event ──► rules ──► fetch source once ──┬─► output 0: validate → resize → optimize → upload
//!                                         ├─► output 1: ...
//!                                         └─► output N: ...
//!                                                      │
//!                                   aggregate: ok only if every output succeeded
//! ```
//!
//! Outputs are independent. A failing output is recorded and its siblings
//! still run; the invocation as a whole fails afterwards, reporting every
//! failure in rule/output order. Uploads are retried a bounded number of
//! times (10 by default).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | TOML rule file loading, validation and the documented stock file |
//! | [`template`] | Output key templates (`{0}`, `{}`, `{{`/`}}`) expanded from capture groups |
//! | [`rules`] | Compiled rule set; maps a bucket/key to resolved outputs |
//! | [`attributes`] | Upload attribute allow-list and content type guessing |
//! | [`imaging`] | Image collaborator trait, pure-Rust backend and resize policies |
//! | [`storage`] | Object store collaborator trait and a directory-backed store |
//! | [`retry`] | Bounded retry with exponential backoff |
//! | [`pipeline`] | The per-output stages |
//! | [`event`] | Storage event model and key decoding |
//! | [`handler`] | Orchestration of one event: fetch, fan out, aggregate |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Collaborators Behind Traits
//!
//! Image work and storage access sit behind [`imaging::ImageBackend`] and
//! [`storage::ObjectStore`]. The engine is generic over both, so the whole
//! pipeline runs in unit tests against recording mocks, and a different store
//! can be plugged in without touching the pipeline.
//!
//! ## Rules Validated at Load Time
//!
//! Key patterns are compiled and every output template is checked against
//! the number of capture groups when the rule set is built. A typo in a
//! template is a startup error, not a failure on the first matching upload.
//!
//! ## Deterministic Failure Reporting
//!
//! Outputs may run on a rayon pool (`processing.parallel_outputs`), but
//! results are collected in job order. The list of failures, and the one
//! reported as representative, is the same whichever mode ran.

pub mod attributes;
pub mod config;
pub mod event;
pub mod handler;
pub mod imaging;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod rules;
pub mod storage;
pub mod template;

#[cfg(test)]
pub(crate) mod test_helpers;
