//! CLI output formatting.
//!
//! Output leads with the object locations involved (`s3://bucket/key`), with
//! per-output details indented underneath. Rule and output positions are the
//! same 0-based indices used in logs and error messages, so a line on screen
//! can be traced back to the configuration file.
//!
//! # Output Format
//!
//! ## Handle
//!
//! ```text
//! s3://photos/uploads/cats/fluffy.jpg
//! rule #0
//!     output #0 → s3://photos/thumbs/cats/fluffy-200.jpg
//!         resized to 200px, 5120 bytes, 1 attempt
//!     output #1 → s3://photos-public/large/cats/fluffy.jpg
//!         passed through (800px wide), 81234 bytes, 3 attempts
//! Completed 2 outputs
//! ```
//!
//! When outputs fail the successful ones are listed the same way, followed by:
//!
//! ```text
//! Failed 1 of 3 outputs
//!     rule #0 output #2 → s3://photos/large/cats/fluffy.jpg
//!         upload: upload failed after 10 attempt(s): ...
//! ```
//!
//! ## Match
//!
//! ```text
//! s3://photos/uploads/cats/fluffy.jpg
//! rule #0 ^uploads/(\w+)/(\w+)\.(jpg|png)$
//!     output #0 → s3://photos/thumbs/cats/fluffy-200.jpg (200px, ONLY_SHRINK)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::config::PipelineConfig;
use crate::event::ObjectRef;
use crate::handler::{AggregateError, CompletedOutput, HandleReport};
use crate::imaging::ResizeOutcome;
use crate::pipeline::UploadReceipt;
use crate::rules::{MatchResult, ResolvedOutput, RuleSet};

// ============================================================================
// Shared helpers
// ============================================================================

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn location(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// One line summarizing what happened to an uploaded output.
///
/// ```text
/// resized to 200px, 5120 bytes, 1 attempt
/// passed through (800px wide), 81234 bytes, 3 attempts
/// ```
fn receipt_line(receipt: &UploadReceipt) -> String {
    let what = match receipt.resize {
        ResizeOutcome::Resized { width } => format!("resized to {width}px"),
        ResizeOutcome::PassedThrough { native_width } => {
            format!("passed through ({native_width}px wide)")
        }
    };
    let mut line = format!(
        "{what}, {} bytes, {}",
        receipt.bytes,
        plural(receipt.attempts as usize, "attempt")
    );
    if let Some(region) = &receipt.region {
        line.push_str(&format!(", region {region}"));
    }
    line
}

/// Completed outputs grouped under their rule headers.
fn completed_lines(completed: &[CompletedOutput]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_rule = None;
    for done in completed {
        if current_rule != Some(done.label.rule_index) {
            current_rule = Some(done.label.rule_index);
            lines.push(format!("rule #{}", done.label.rule_index));
        }
        lines.push(format!(
            "{}output #{} \u{2192} {}",
            indent(1),
            done.label.output_index,
            location(&done.label.bucket, &done.label.key)
        ));
        lines.push(format!("{}{}", indent(2), receipt_line(&done.receipt)));
    }
    lines
}

// ============================================================================
// handle
// ============================================================================

/// Format the result of an invocation where nothing failed.
pub fn format_report(report: &HandleReport) -> Vec<String> {
    let mut lines = vec![location(&report.object.bucket, &report.object.key)];
    if report.is_no_match() {
        lines.push(format!("{}no matching rule, nothing to do", indent(1)));
        return lines;
    }
    lines.extend(completed_lines(&report.completed));
    lines.push(format!("Completed {}", plural(report.completed.len(), "output")));
    lines
}

/// Format an invocation where at least one output failed.
pub fn format_failure(error: &AggregateError) -> Vec<String> {
    let mut lines = vec![location(&error.object.bucket, &error.object.key)];
    lines.extend(completed_lines(&error.completed));
    lines.push(format!(
        "Failed {} of {}",
        error.failures.len(),
        plural(error.attempted, "output")
    ));
    for failure in &error.failures {
        lines.push(format!(
            "{}rule #{} output #{} \u{2192} {}",
            indent(1),
            failure.label.rule_index,
            failure.label.output_index,
            location(&failure.label.bucket, &failure.label.key)
        ));
        lines.push(format!(
            "{}{}: {}",
            indent(2),
            failure.error.kind(),
            failure.error
        ));
    }
    lines
}

pub fn print_report(report: &HandleReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

pub fn print_failure(error: &AggregateError) {
    for line in format_failure(error) {
        println!("{}", line);
    }
}

// ============================================================================
// match
// ============================================================================

fn resolved_line(index: usize, output: &ResolvedOutput) -> String {
    let width = output
        .width
        .map(|w| format!("{w}px"))
        .unwrap_or_else(|| "no width".to_string());
    format!(
        "{}output #{index} \u{2192} {} ({width}, {})",
        indent(1),
        location(&output.bucket, &output.key),
        output.policy
    )
}

/// Format which rules an object would trigger, without running anything.
pub fn format_matches(object: &ObjectRef, matches: &[MatchResult]) -> Vec<String> {
    let mut lines = vec![location(&object.bucket, &object.key)];
    if matches.is_empty() {
        lines.push(format!("{}no matching rule", indent(1)));
        return lines;
    }
    for m in matches {
        lines.push(format!("rule #{} {}", m.rule_index, m.key_regexp));
        for (index, output) in m.outputs.iter().enumerate() {
            lines.push(resolved_line(index, output));
            if let Some(region) = &output.region {
                lines.push(format!("{}region: {region}", indent(2)));
            }
        }
    }
    lines
}

pub fn print_matches(object: &ObjectRef, matches: &[MatchResult]) {
    for line in format_matches(object, matches) {
        println!("{}", line);
    }
}

// ============================================================================
// check
// ============================================================================

/// Format a summary of a loaded configuration, flagging rules that can
/// never fire and outputs that will always fail.
pub fn format_check(config: &PipelineConfig, rules: &RuleSet) -> Vec<String> {
    let mut lines = vec![format!(
        "Rules: {} ({} eligible)",
        rules.len(),
        rules.eligible_count()
    )];

    for (index, rule) in rules.rules().iter().enumerate() {
        let bucket = rule.bucket.as_deref().unwrap_or("<none>");
        let pattern = rule.key_regexp().unwrap_or("<none>");
        lines.push(format!(
            "rule #{index} {bucket} {pattern} ({})",
            plural(rule.outputs.len(), "output")
        ));

        let mut problems = Vec::new();
        if rule.bucket.is_none() {
            problems.push("no bucket".to_string());
        }
        if rule.key_regexp().is_none() {
            problems.push("no key_regexp".to_string());
        }
        if rule.outputs.is_empty() {
            problems.push("no outputs".to_string());
        }
        if !problems.is_empty() {
            lines.push(format!(
                "{}never matches: {}",
                indent(1),
                problems.join(", ")
            ));
        }

        for (output_index, output) in rule.outputs.iter().enumerate() {
            if output.width.is_none_or(|w| w == 0) {
                lines.push(format!(
                    "{}output #{output_index} {}: missing or zero width, will always fail",
                    indent(1),
                    output.key
                ));
            }
        }
    }

    let retry = &config.retry;
    lines.push(format!(
        "Retry: {}, backoff {}ms..{}ms x{}",
        plural(retry.max_attempts as usize, "attempt"),
        retry.initial_backoff_ms,
        retry.max_backoff_ms,
        retry.multiplier
    ));
    lines.push(format!(
        "Outputs: {}",
        if config.processing.parallel_outputs {
            "parallel"
        } else {
            "sequential"
        }
    ));
    lines.push(format!("JPEG quality: {}", config.optimize.jpeg_quality));
    lines
}

pub fn print_check(config: &PipelineConfig, rules: &RuleSet) {
    for line in format_check(config, rules) {
        println!("{}", line);
    }
}
