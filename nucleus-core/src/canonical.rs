//! Canonical JSON encoding and SHA-256 hashing.
//!
//! This is the only encoding allowed for hashing anywhere in the system:
//! UTF-8, object keys sorted lexicographically, no insignificant
//! whitespace, numbers in `serde_json`'s own shortest round-trip form.
//! Every audit entry hash and every permission fingerprint is computed
//! over this representation so that two semantically-equal JSON values
//! (same keys, different order) always hash the same.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Re-serialize a JSON value with object keys sorted, recursively.
///
/// `serde_json::Value`'s `Object` variant is backed by a `BTreeMap` when
/// the `preserve_order` feature is off (the default, and the only
/// feature this workspace enables), so a plain re-serialization through
/// `Value` already sorts keys; this function exists to make that
/// invariant explicit and to keep the recursive-sort behavior even if a
/// future dependency change enables `preserve_order` upstream.
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Serialize a value to its canonical JSON byte string.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let as_value = serde_json::to_value(value)?;
    let canon = canonicalize(&as_value);
    serde_json::to_vec(&canon)
}

/// SHA-256 hash of the canonical JSON encoding of `value`, hex-encoded.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = canonical_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// SHA-256 hash of arbitrary bytes, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Build a permission-grant fingerprint: `SHA-256(agent_id | capability | canonical_json(params))`.
pub fn fingerprint(agent_id: &str, capability: &str, params: &serde_json::Value) -> String {
    let canon_params = canonicalize(params);
    let params_json = serde_json::to_string(&canon_params).unwrap_or_default();
    let joined = format!("{agent_id}|{capability}|{params_json}");
    sha256_hex(joined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_sorts_nested_object_keys() {
        let v = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let c = canonicalize(&v);
        let rendered = serde_json::to_string(&c).unwrap();
        assert_eq!(rendered, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn canonical_hash_is_order_independent() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn canonical_hash_differs_on_value_change() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn fingerprint_is_sensitive_to_every_component() {
        let p = json!({"path": "/etc/passwd"});
        let f1 = fingerprint("agent-1", "fs_write", &p);
        let f2 = fingerprint("agent-2", "fs_write", &p);
        let f3 = fingerprint("agent-1", "fs_read", &p);
        let f4 = fingerprint("agent-1", "fs_write", &json!({"path": "/tmp/x"}));
        let all = [f1.clone(), f2, f3, f4];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "fingerprints {i} and {j} collided");
                }
            }
        }
        // Stable: same inputs always produce the same fingerprint.
        assert_eq!(f1, fingerprint("agent-1", "fs_write", &p));
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        // SHA-256("") per FIPS 180-4 test vectors.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
