//! Cache key derivation for build steps
//!
//! A step's cache key is a truncated SHA256 over the identity of the image
//! it runs against plus everything that describes the step. Same lineage
//! and same step = same key.
//!
//! Every field is length-prefixed so adjacent fields cannot bleed into each
//! other (`["ab", "c"]` and `["a", "bc"]` hash differently). Mappings are
//! hashed in key order, so insertion order never matters; the command
//! argument list is hashed as given, so argument order does.
//!
//! Truncation to 12 hex characters leaves 48 bits. Two distinct steps that
//! collide share one cache tag and the later commit silently wins.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex characters kept from the digest by default
pub const DEFAULT_KEY_LENGTH: usize = 12;

/// Full length of a hex-encoded SHA256 digest
pub const MAX_KEY_LENGTH: usize = 64;

/// One unit of cacheable work
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepRequest {
    /// Command and arguments, run without a shell unless the command is one
    pub command: Vec<String>,
    /// Environment for this step only
    pub env: Option<BTreeMap<String, String>>,
    /// Caller-supplied values that disambiguate otherwise identical commands
    pub extra: Option<BTreeMap<String, Value>>,
}

impl StepRequest {
    /// Create a request for `command` with no env or extra keys
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            env: None,
            extra: None,
        }
    }

    /// Set one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add one extra cache key
    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Derive this step's key against `current_image`
    pub fn key(&self, current_image: &str, length: usize) -> String {
        derive_key(
            current_image,
            &self.command,
            self.env.as_ref(),
            self.extra.as_ref(),
            length,
        )
    }
}

/// Derive the cache key for a step run against `current_image`.
///
/// `length` is clamped to `DEFAULT_KEY_LENGTH..=MAX_KEY_LENGTH`. An absent
/// mapping and an empty one hash identically.
pub fn derive_key(
    current_image: &str,
    command: &[String],
    env: Option<&BTreeMap<String, String>>,
    extra: Option<&BTreeMap<String, Value>>,
    length: usize,
) -> String {
    let mut hasher = Sha256::new();

    // Lineage first for chain integrity
    field(&mut hasher, current_image.as_bytes());

    count(&mut hasher, command.len());
    for arg in command {
        field(&mut hasher, arg.as_bytes());
    }

    let env_len = env.map_or(0, BTreeMap::len);
    count(&mut hasher, env_len);
    for (k, v) in env.into_iter().flatten() {
        field(&mut hasher, k.as_bytes());
        field(&mut hasher, v.as_bytes());
    }

    let mut canonical = String::new();
    if let Some(extra) = extra {
        write_canonical_map(extra.iter(), &mut canonical);
    }
    field(&mut hasher, canonical.as_bytes());

    let hash = hex::encode(hasher.finalize());
    let length = length.clamp(DEFAULT_KEY_LENGTH, MAX_KEY_LENGTH);
    hash[..length].to_string()
}

/// Build the image tag that stores a cache entry
pub fn cache_tag(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

fn count(hasher: &mut Sha256, n: usize) {
    hasher.update((n as u64).to_le_bytes());
}

fn field(hasher: &mut Sha256, bytes: &[u8]) {
    count(hasher, bytes.len());
    hasher.update(bytes);
}

/// Serialize a JSON value with every object's keys sorted, recursively.
///
/// Does not rely on serde_json's map ordering, which changes with the
/// `preserve_order` feature.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_map(map.iter(), out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_map<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>, out: &mut String) {
    let mut sorted: Vec<(&String, &Value)> = entries.collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (k, v)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
    }
    out.push('}');
}
