//! Hashing System - SHA-256 content keys
//!
//! Output files are addressed by a hash of an asset's defining attributes
//! (file name, operation history, dimensions, pixel buffer size) rather than its
//! pixels. Hashing multi-megapixel buffers on every build is too slow; the cost is
//! that two different images sharing every attribute collapse to one key. That
//! collision is accepted, not treated as a bug.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::transformable::Operation;

/// Number of hex characters of the digest kept in output file names.
pub const CONTENT_KEY_LEN: usize = 16;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// The exact tuple a content key is derived from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashableAsset<'a> {
    pub output_file: String,
    pub operations: &'a [Operation],
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// Compute the content key used in `<stem>.<key><ext>` output names.
pub fn compute_content_key(asset: &HashableAsset<'_>) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(asset)?;
    let mut key = sha256_hex(canonical.as_bytes());
    key.truncate(CONTENT_KEY_LEN);
    Ok(key)
}
