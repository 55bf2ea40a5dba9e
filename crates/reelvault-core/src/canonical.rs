//! Canonical JSON encoding.
//!
//! Signed JSON documents (licenses, revocation lists) are verified over a
//! canonical byte form, never over whatever bytes happened to be on disk.
//!
//! ## Rules
//!
//! 1. Object keys are sorted by their UTF-8 bytes.
//! 2. No insignificant whitespace: `,` and `:` separators only.
//! 3. Strings use serde_json escaping (minimal, `\uXXXX` for control chars).
//! 4. Numbers are written as serde_json renders them.
//! 5. Arrays keep their order.

use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Encode a JSON value canonically.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_value(&mut out, value);
    out
}

/// Encode a JSON object canonically with one top-level field removed.
///
/// Used for documents that carry their own signature inline.
pub fn canonical_json_without(value: &Value, field: &str) -> Vec<u8> {
    match value {
        Value::Object(map) => {
            let mut stripped = map.clone();
            stripped.remove(field);
            canonical_json(&Value::Object(stripped))
        }
        other => canonical_json(other),
    }
}

/// Serialize any value to canonical JSON.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(canonical_json(&value))
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key);
                out.push(b':');
                write_value(out, item);
            }
            out.push(b'}');
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    // Serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(quoted) => out.extend_from_slice(quoted.as_bytes()),
        Err(_) => out.extend_from_slice(b"\"\""),
    }
}
