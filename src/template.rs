//! Output key templates.
//!
//! An output key is written as a template whose placeholders consume the
//! capture groups of the rule's `key_regexp`, positionally:
//!
//! ```text
//! key_regexp = '^img/(\w+)/(\w+)\.png$'
//! key        = "out/{0}/{1}.jpg"
//!
//! img/cats/fluffy.png  →  out/cats/fluffy.jpg
//! ```
//!
//! ## Syntax
//!
//! | Form | Meaning |
//! |---|---|
//! | `{0}`, `{1}`, … | capture group by position (0 = first group) |
//! | `{}` | next group, auto-numbered from 0 |
//! | `{{`, `}}` | literal brace |
//!
//! Auto-numbered and explicit placeholders cannot be mixed in one template.
//! Named fields and format specs (`{0:>4}`) are rejected.
//!
//! Templates are parsed once when rules are compiled so a reference to a
//! group the pattern does not define is a configuration error, not a failure
//! discovered on the first matching upload.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {template:?} references group {index} but the pattern has {available} group(s)")]
    UnknownGroup {
        template: String,
        index: usize,
        available: usize,
    },
    #[error("template {template:?} has an unmatched '{brace}' at byte {position}")]
    UnmatchedBrace {
        template: String,
        brace: char,
        position: usize,
    },
    #[error("template {template:?} has unsupported field {field:?} (only positional groups are allowed)")]
    UnsupportedField { template: String, field: String },
    #[error("template {template:?} mixes automatic '{{}}' and numbered '{{N}}' fields")]
    MixedNumbering { template: String },
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Group(usize),
}

/// Parse a template into literal and group segments.
pub fn parse_template(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut auto_index = 0usize;
    let mut saw_auto = false;
    let mut saw_manual = false;
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(TemplateError::UnmatchedBrace {
                    template: template.to_string(),
                    brace: '}',
                    position: pos,
                });
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for (_, fc) in chars.by_ref() {
                    if fc == '}' {
                        closed = true;
                        break;
                    }
                    field.push(fc);
                }
                if !closed {
                    return Err(TemplateError::UnmatchedBrace {
                        template: template.to_string(),
                        brace: '{',
                        position: pos,
                    });
                }

                let index = if field.is_empty() {
                    saw_auto = true;
                    let i = auto_index;
                    auto_index += 1;
                    i
                } else if field.bytes().all(|b| b.is_ascii_digit()) {
                    saw_manual = true;
                    field
                        .parse::<usize>()
                        .map_err(|_| TemplateError::UnsupportedField {
                            template: template.to_string(),
                            field: field.clone(),
                        })?
                } else {
                    return Err(TemplateError::UnsupportedField {
                        template: template.to_string(),
                        field,
                    });
                };

                if saw_auto && saw_manual {
                    return Err(TemplateError::MixedNumbering {
                        template: template.to_string(),
                    });
                }

                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Group(index));
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Check that every placeholder in `template` refers to one of
/// `group_count` capture groups.
pub fn validate_template(template: &str, group_count: usize) -> Result<(), TemplateError> {
    for segment in parse_template(template)? {
        if let Segment::Group(index) = segment
            && index >= group_count
        {
            return Err(TemplateError::UnknownGroup {
                template: template.to_string(),
                index,
                available: group_count,
            });
        }
    }
    Ok(())
}

/// Substitute captured groups into `template`.
///
/// `groups` holds the pattern's capture groups in order, excluding the whole
/// match. A group that exists in the pattern but did not participate in the
/// match (e.g. an unmatched optional group) expands to the empty string.
pub fn expand_template(template: &str, groups: &[Option<&str>]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse_template(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Group(index) => match groups.get(index) {
                Some(value) => out.push_str(value.unwrap_or("")),
                None => {
                    return Err(TemplateError::UnknownGroup {
                        template: template.to_string(),
                        index,
                        available: groups.len(),
                    });
                }
            },
        }
    }
    Ok(out)
}
