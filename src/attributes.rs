//! Upload attributes: allow-list filtering and content-type inference.
//!
//! Outputs may carry arbitrary attributes in configuration, but only a fixed
//! set of object-store write parameters is ever passed through. Everything
//! else is dropped without complaint, so configuration cannot smuggle
//! transfer options the store does not expect.
//!
//! On top of the filtered attributes, `ContentType` and (for gzip only)
//! `ContentEncoding` are guessed from the output file name. A guessed value
//! never replaces an explicitly configured one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name → value, ordered for stable logging and sidecar output.
pub type Attributes = BTreeMap<String, AttributeValue>;

pub const CONTENT_TYPE: &str = "ContentType";
pub const CONTENT_ENCODING: &str = "ContentEncoding";

/// Write parameters that survive [`filter_attributes`].
pub const PERMITTED_ATTRIBUTES: &[&str] = &[
    "ACL",
    "CacheControl",
    "ContentDisposition",
    "ContentEncoding",
    "ContentLanguage",
    "ContentLength",
    "ContentMD5",
    "ContentType",
    "Expires",
    "GrantFullControl",
    "GrantRead",
    "GrantReadACP",
    "GrantWriteACP",
    "Metadata",
    "ServerSideEncryption",
    "StorageClass",
    "WebsiteRedirectLocation",
    "SSECustomerAlgorithm",
    "SSECustomerKey",
    "SSEKMSKeyId",
    "RequestPayer",
];

/// A single attribute value as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Flag(bool),
    /// String map, used by `Metadata`.
    Map(BTreeMap<String, String>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

/// Keep only the attributes named in [`PERMITTED_ATTRIBUTES`].
///
/// Absent input yields an empty set.
pub fn filter_attributes(raw: Option<&Attributes>) -> Attributes {
    let Some(raw) = raw else {
        return Attributes::new();
    };
    raw.iter()
        .filter(|(key, _)| PERMITTED_ATTRIBUTES.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Compression suffixes and the encoding they imply.
const ENCODING_SUFFIXES: &[(&str, &str)] = &[
    ("gz", "gzip"),
    ("z", "compress"),
    ("bz2", "bzip2"),
    ("xz", "xz"),
    ("br", "br"),
];

/// Shorthand suffixes that stand for `<ext>.<compression>`.
const SUFFIX_ALIASES: &[(&str, &str)] = &[
    ("tgz", "tar.gz"),
    ("taz", "tar.gz"),
    ("tz", "tar.gz"),
    ("tbz2", "tar.bz2"),
    ("txz", "tar.xz"),
    ("svgz", "svg.gz"),
];

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpe", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("bmp", "image/bmp"),
    ("ico", "image/vnd.microsoft.icon"),
    ("svg", "image/svg+xml"),
    ("avif", "image/avif"),
    ("heic", "image/heic"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("txt", "text/plain"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "text/xml"),
    ("pdf", "application/pdf"),
    ("tar", "application/x-tar"),
    ("zip", "application/zip"),
];

fn extension(name: &str) -> Option<&str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let dot = file.rfind('.')?;
    // Leading-dot names like ".hidden" have no extension.
    (dot > 0).then(|| &file[dot + 1..])
}

fn strip_extension(name: &str) -> &str {
    match extension(name) {
        Some(ext) => &name[..name.len() - ext.len() - 1],
        None => name,
    }
}

fn lookup<'a>(table: &'a [(&str, &str)], ext: &str) -> Option<&'a str> {
    let lower = ext.to_ascii_lowercase();
    table
        .iter()
        .find(|(candidate, _)| *candidate == lower)
        .map(|(_, value)| *value)
}

/// Guess `(content_type, encoding)` from a file name or object key.
pub fn guess_type(name: &str) -> (Option<&'static str>, Option<&'static str>) {
    let mut owned;
    let mut name = name;

    if let Some(expanded) = extension(name).and_then(|ext| lookup(SUFFIX_ALIASES, ext)) {
        owned = strip_extension(name).to_string();
        owned.push('.');
        owned.push_str(expanded);
        name = owned.as_str();
    }

    let mut encoding = None;
    if let Some(enc) = extension(name).and_then(|ext| lookup(ENCODING_SUFFIXES, ext)) {
        encoding = Some(enc);
        name = strip_extension(name);
    }

    let content_type = extension(name).and_then(|ext| lookup(CONTENT_TYPES, ext));
    (content_type, encoding)
}

/// Attributes inferred from a file name: `ContentType` when the extension
/// is known, `ContentEncoding=gzip` when the name carries a gzip suffix.
pub fn guess_mimetype(name: &str) -> Attributes {
    let mut attrs = Attributes::new();
    let (content_type, encoding) = guess_type(name);
    if let Some(content_type) = content_type {
        attrs.insert(CONTENT_TYPE.to_string(), content_type.into());
    }
    if encoding == Some("gzip") {
        attrs.insert(CONTENT_ENCODING.to_string(), "gzip".into());
    }
    attrs
}

/// Final attribute set for one upload.
///
/// Filters `raw`, then fills in guessed values that are not already set.
/// The guess uses `output_key` first and falls back to `local_name` when
/// the key has no recognizable extension.
pub fn upload_attributes(raw: Option<&Attributes>, output_key: &str, local_name: &str) -> Attributes {
    let mut attrs = filter_attributes(raw);

    let mut guessed = guess_mimetype(output_key);
    if !guessed.contains_key(CONTENT_TYPE) {
        for (key, value) in guess_mimetype(local_name) {
            guessed.entry(key).or_insert(value);
        }
    }

    for (key, value) in guessed {
        attrs.entry(key).or_insert(value);
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), AttributeValue::from(*v)))
            .collect()
    }

    #[test]
    fn filter_absent_is_empty() {
        assert!(filter_attributes(None).is_empty());
    }

    #[test]
    fn filter_drops_unknown_keys() {
        let raw = attrs(&[
            ("ACL", "public-read"),
            ("RandomKey", "x"),
            ("Bucket", "elsewhere"),
        ]);
        let filtered = filter_attributes(Some(&raw));
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("ACL"));
        assert!(!filtered.contains_key("RandomKey"));
        assert!(!filtered.contains_key("Bucket"));
    }

    #[test]
    fn filter_keeps_every_permitted_key() {
        let raw: Attributes = PERMITTED_ATTRIBUTES
            .iter()
            .map(|k| (k.to_string(), AttributeValue::from("v")))
            .collect();
        assert_eq!(filter_attributes(Some(&raw)).len(), PERMITTED_ATTRIBUTES.len());
    }

    #[test]
    fn filter_is_case_sensitive() {
        let raw = attrs(&[("acl", "public-read")]);
        assert!(filter_attributes(Some(&raw)).is_empty());
    }

    #[test]
    fn guess_common_image_types() {
        assert_eq!(guess_type("a/b/photo.jpg"), (Some("image/jpeg"), None));
        assert_eq!(guess_type("photo.JPEG"), (Some("image/jpeg"), None));
        assert_eq!(guess_type("icon.png"), (Some("image/png"), None));
        assert_eq!(guess_type("anim.gif"), (Some("image/gif"), None));
        assert_eq!(guess_type("x.webp"), (Some("image/webp"), None));
    }

    #[test]
    fn guess_unknown_or_missing_extension() {
        assert_eq!(guess_type("thumbs/abc"), (None, None));
        assert_eq!(guess_type("file.unknownext"), (None, None));
        assert_eq!(guess_type("dir.d/noext"), (None, None));
        assert_eq!(guess_type(".hidden"), (None, None));
    }

    #[test]
    fn guess_compressed_names() {
        assert_eq!(guess_type("vector.svg.gz"), (Some("image/svg+xml"), Some("gzip")));
        assert_eq!(guess_type("bundle.tgz"), (Some("application/x-tar"), Some("gzip")));
        assert_eq!(guess_type("data.json.bz2"), (Some("application/json"), Some("bzip2")));
        assert_eq!(guess_type("blob.gz"), (None, Some("gzip")));
    }

    #[test]
    fn guess_mimetype_only_propagates_gzip() {
        let gz = guess_mimetype("vector.svg.gz");
        assert_eq!(gz[CONTENT_TYPE], AttributeValue::from("image/svg+xml"));
        assert_eq!(gz[CONTENT_ENCODING], AttributeValue::from("gzip"));

        let bz = guess_mimetype("data.json.bz2");
        assert!(bz.contains_key(CONTENT_TYPE));
        assert!(!bz.contains_key(CONTENT_ENCODING));
    }

    #[test]
    fn explicit_content_type_wins_over_guess() {
        let raw = attrs(&[("ContentType", "image/png")]);
        let merged = upload_attributes(Some(&raw), "out/cat.jpg", "/tmp/x.jpg");
        assert_eq!(merged[CONTENT_TYPE], AttributeValue::from("image/png"));
    }

    #[test]
    fn explicit_content_encoding_wins_over_guess() {
        let raw = attrs(&[("ContentEncoding", "identity")]);
        let merged = upload_attributes(Some(&raw), "out/vector.svg.gz", "/tmp/x.svg");
        assert_eq!(merged[CONTENT_ENCODING], AttributeValue::from("identity"));
        assert_eq!(merged[CONTENT_TYPE], AttributeValue::from("image/svg+xml"));
    }

    #[test]
    fn guess_fills_missing_content_type() {
        let raw = attrs(&[("CacheControl", "max-age=60"), ("RandomKey", "1")]);
        let merged = upload_attributes(Some(&raw), "out/cat.jpg", "/tmp/x.png");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[CONTENT_TYPE], AttributeValue::from("image/jpeg"));
        assert!(!merged.contains_key("RandomKey"));
    }

    #[test]
    fn guess_falls_back_to_local_name() {
        let merged = upload_attributes(None, "thumbs/cat", "/tmp/.tmpAbC123.png");
        assert_eq!(merged[CONTENT_TYPE], AttributeValue::from("image/png"));
    }

    #[test]
    fn disallowed_key_absent_even_when_guessable() {
        let raw = attrs(&[("RandomKey", "x")]);
        let merged = upload_attributes(Some(&raw), "out.jpg", "local.jpg");
        assert!(!merged.contains_key("RandomKey"));
    }
}
