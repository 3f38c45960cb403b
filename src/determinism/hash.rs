//! Provenance hashing.
//!
//! Structured values are canonicalized before hashing (object keys sorted,
//! no whitespace, minimal string escaping) so key insertion order never
//! changes a digest. Text and binary artifacts are hashed as raw bytes.
//!
//! Digest format: `sha256:<64 lowercase hex chars>`.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::util::HASH_PREFIX;

/// Something that can be content-hashed
#[derive(Debug, Clone, Copy)]
pub enum Artifact<'a> {
    /// Structured value, hashed in canonical form
    Json(&'a Value),
    /// Text, hashed as its UTF-8 bytes
    Text(&'a str),
    /// Raw bytes
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Value> for Artifact<'a> {
    fn from(value: &'a Value) -> Self {
        // A bare JSON string is text, not a structured value
        match value {
            Value::String(s) => Artifact::Text(s),
            other => Artifact::Json(other),
        }
    }
}

impl<'a> From<&'a str> for Artifact<'a> {
    fn from(value: &'a str) -> Self {
        Artifact::Text(value)
    }
}

impl<'a> From<&'a String> for Artifact<'a> {
    fn from(value: &'a String) -> Self {
        Artifact::Text(value)
    }
}

impl<'a> From<&'a [u8]> for Artifact<'a> {
    fn from(value: &'a [u8]) -> Self {
        Artifact::Bytes(value)
    }
}

/// Hash an artifact into an algorithm-prefixed digest.
pub fn hash_artifact<'a>(artifact: impl Into<Artifact<'a>>) -> String {
    match artifact.into() {
        Artifact::Json(value) => hash_bytes(canonicalize_json(value).as_bytes()),
        Artifact::Text(text) => hash_bytes(text.as_bytes()),
        Artifact::Bytes(bytes) => hash_bytes(bytes),
    }
}

/// Hash any serializable value through its canonical JSON form.
pub fn hash_serializable<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(hash_artifact(&value))
}

/// Hash raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{}{:x}", HASH_PREFIX, Sha256::digest(bytes))
}

/// Canonical JSON string: sorted keys, no whitespace.
pub fn canonicalize_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(n)),
        Value::String(s) => write_string(s, out),
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
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            if f == 0.0 {
                "0".to_string()
            } else if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", f as i64)
            } else {
                // Rust's shortest round-trip formatting is platform independent
                format!("{}", f)
            }
        }
        _ => "null".to_string(),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c < '\x20' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
