//! Rule matching.
//!
//! A [`RuleSet`] is compiled once from the configured [`RuleConfig`]s and then
//! answers, for each stored object, which rules apply and which outputs they
//! produce. Matching is a pure function of the rule set, the bucket and the
//! key.
//!
//! A rule matches when:
//! 1. its `bucket` equals the object's bucket exactly,
//! 2. it has a `key_regexp` and at least one output,
//! 3. the pattern matches at the start of the key (prefix match, like a
//!    conventional regex "match" rather than "search").
//!
//! Each match yields a [`MatchResult`] owning freshly built
//! [`ResolvedOutput`]s. The compiled rules are never modified, so a rule set
//! can serve any number of invocations.

use crate::attributes::Attributes;
use crate::config::{ConfigError, OutputConfig, RuleConfig};
use crate::imaging::ResizePolicy;
use crate::template::{TemplateError, expand_template, validate_template};
use regex::Regex;
use tracing::debug;

/// One rule after pattern compilation and template validation.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub bucket: Option<String>,
    /// Anchored at the start of the key.
    pattern: Option<Regex>,
    source_pattern: Option<String>,
    pub outputs: Vec<OutputConfig>,
}

impl CompiledRule {
    /// Compile one rule. `index` is only used in error messages.
    pub fn compile(index: usize, config: &RuleConfig) -> Result<Self, ConfigError> {
        let pattern = match &config.key_regexp {
            Some(source) => Some(
                Regex::new(&format!(r"\A(?:{source})"))
                    .map_err(|e| ConfigError::InvalidPattern { rule: index, source: e })?,
            ),
            None => None,
        };

        if let Some(regex) = &pattern {
            // captures_len counts the implicit whole-match group.
            let groups = regex.captures_len() - 1;
            for (output_index, output) in config.outputs.iter().enumerate() {
                validate_template(&output.key, groups).map_err(|e| ConfigError::Template {
                    rule: index,
                    output: output_index,
                    source: e,
                })?;
            }
        }

        Ok(Self {
            bucket: config.bucket.clone(),
            pattern,
            source_pattern: config.key_regexp.clone(),
            outputs: config.outputs.clone(),
        })
    }

    /// The `key_regexp` as written in configuration.
    pub fn key_regexp(&self) -> Option<&str> {
        self.source_pattern.as_deref()
    }

    /// Has a pattern and at least one output.
    pub fn is_eligible(&self) -> bool {
        self.pattern.is_some() && !self.outputs.is_empty()
    }

    /// Match against `key`, returning the capture groups (excluding the
    /// whole match) when the pattern matches at the start.
    fn capture<'k>(&self, key: &'k str) -> Option<Vec<Option<&'k str>>> {
        let captures = self.pattern.as_ref()?.captures(key)?;
        Some(
            captures
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str()))
                .collect(),
        )
    }
}

/// An output with its bucket and key resolved for one concrete object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutput {
    pub bucket: String,
    pub key: String,
    /// The template `key` was expanded from.
    pub key_template: String,
    pub width: Option<u32>,
    pub policy: ResizePolicy,
    pub region: Option<String>,
    /// Raw attributes; filtered right before upload.
    pub attributes: Option<Attributes>,
}

/// A rule bound to one matching key.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Position of the rule in configuration.
    pub rule_index: usize,
    pub key_regexp: String,
    pub outputs: Vec<ResolvedOutput>,
}

/// All configured rules, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile every rule; the first invalid pattern or template fails the
    /// whole set.
    pub fn compile(configs: &[RuleConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(index, config)| CompiledRule::compile(index, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Rules that can ever match (pattern, bucket and outputs present).
    pub fn eligible_count(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| r.bucket.is_some() && r.is_eligible())
            .count()
    }

    /// Every rule matching `bucket`/`key`, in configuration order, with its
    /// outputs resolved.
    pub fn matches(&self, bucket: &str, key: &str) -> Result<Vec<MatchResult>, TemplateError> {
        let mut results = Vec::new();

        for (rule_index, rule) in self.rules.iter().enumerate() {
            if rule.bucket.as_deref() != Some(bucket) || !rule.is_eligible() {
                continue;
            }
            let Some(groups) = rule.capture(key) else {
                continue;
            };
            debug!(rule = rule_index, key, groups = ?groups, "rule matched");

            let outputs = rule
                .outputs
                .iter()
                .map(|output| resolve_output(output, bucket, &groups))
                .collect::<Result<Vec<_>, _>>()?;

            results.push(MatchResult {
                rule_index,
                key_regexp: rule.key_regexp().unwrap_or_default().to_string(),
                outputs,
            });
        }

        Ok(results)
    }
}

fn resolve_output(
    output: &OutputConfig,
    source_bucket: &str,
    groups: &[Option<&str>],
) -> Result<ResolvedOutput, TemplateError> {
    Ok(ResolvedOutput {
        bucket: output
            .bucket
            .clone()
            .unwrap_or_else(|| source_bucket.to_string()),
        key: expand_template(&output.key, groups)?,
        key_template: output.key.clone(),
        width: output.width,
        policy: output.policy,
        region: output.region.clone(),
        attributes: output.attr.clone(),
    })
}
