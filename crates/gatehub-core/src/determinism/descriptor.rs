//! Content descriptors: canonical serialization, hashing, and diffing.
//!
//! A descriptor is the structural metadata of one artifact inspection. Two
//! inspections of a reproducible artifact must canonicalize to the same
//! bytes, so canonicalization must depend only on content: keys are sorted,
//! whitespace is fixed, and output is byte-stable across processes.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize a descriptor value: object keys sorted, no insignificant
/// whitespace.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        // Scalar Display is infallible and already canonical.
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 of the canonical form, lowercase hex.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Pretty-print a descriptor with sorted keys, for evidence files and
/// diffing. `serde_json` pretty output already sorts object keys when the
/// value was rebuilt through [`sorted`], so render through that.
#[must_use]
pub fn render_pretty(value: &Value) -> String {
    let sorted = sorted(value);
    serde_json::to_string_pretty(&sorted).unwrap_or_else(|_| canonicalize(value))
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        },
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        scalar => scalar.clone(),
    }
}

/// Positional line diff between two rendered descriptors.
///
/// Lines are compared index by index; a `-`/`+` pair marks a changed line,
/// a lone `-` or `+` marks a removal or addition at the tail. Good enough
/// for human triage of descriptor divergence without a diff dependency.
#[must_use]
pub fn line_diff(baseline: &str, other: &str) -> String {
    let baseline_lines: Vec<&str> = baseline.lines().collect();
    let other_lines: Vec<&str> = other.lines().collect();
    let mut out = String::new();
    let max = baseline_lines.len().max(other_lines.len());
    for i in 0..max {
        match (baseline_lines.get(i), other_lines.get(i)) {
            (Some(b), Some(o)) if b == o => {},
            (Some(b), Some(o)) => {
                out.push_str(&format!("@ line {}\n- {b}\n+ {o}\n", i + 1));
            },
            (Some(b), None) => out.push_str(&format!("@ line {}\n- {b}\n", i + 1)),
            (None, Some(o)) => out.push_str(&format!("@ line {}\n+ {o}\n", i + 1)),
            (None, None) => {},
        }
    }
    out
}
