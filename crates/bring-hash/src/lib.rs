//! Deep-structural canonicalization and stable hashing.
//!
//! An explicit canonicalization step followed by a cryptographic hash,
//! with the property that the hash is stable across releases (so on-disk
//! caches keyed by it stay valid). This module is that canonicalization
//! step.
//!
//! Two JSON values that are structurally equal — same keys (in any order),
//! same nested values — canonicalize to the same byte string and therefore
//! hash to the same digest. This is the property `PkgVersion::id` and
//! `Package::transform_hash` both depend on.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Render `value` as a canonical string: object keys sorted
/// lexicographically at every level, no insignificant whitespace.
///
/// This does not reuse `serde_json`'s own `Display`/`to_string` because
/// those follow the underlying `Map`'s iteration order, which callers
/// could change out from under us by enabling `serde_json`'s
/// `preserve_order` feature transitively. Canonicalization is spelled out
/// explicitly instead, so the hash stability guarantee doesn't depend on
/// that.
pub fn canonical_string(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string always serializes"));
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string always serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Hash a JSON value's canonical form with SHA-256, hex-encoded.
pub fn stable_hash(value: &serde_json::Value) -> String {
    let canonical = canonical_string(value);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Serialize `value` to JSON, then hash its canonical form.
///
/// # Errors
/// Returns an error if `value` can't be serialized to JSON.
pub fn stable_hash_of<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(stable_hash(&json))
}
