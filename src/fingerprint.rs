//! Content digests.
//!
//! Two flavours are used across the codebase: byte digests over raw file
//! content (asset identity) and structural fingerprints over normalised
//! JSON (rubric identity, where formatting and key order must not matter).

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix for registry keys derived from byte digests.
pub const CONTENT_KEY_PREFIX: &str = "content-hash-";

/// Hex sha256 digest of raw bytes, truncated to 12 characters.
pub fn digest12(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex_prefix(&digest, 12)
}

/// Registry key for a byte blob: `content-hash-` + 12 hex chars.
pub fn content_key(bytes: &[u8]) -> String {
    format!("{}{}", CONTENT_KEY_PREFIX, digest12(bytes))
}

/// Structural fingerprint of a serialisable value, truncated to 16 hex
/// characters. The value is serialised to JSON with sorted keys and all
/// strings trimmed, so cosmetic differences in the source YAML do not
/// change the fingerprint.
pub fn structural16<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_value(value)?;
    normalise(&mut json);
    let canonical = serde_json::to_string(&json)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(hex_prefix(&digest, 16))
}

fn normalise(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            *s = s.trim().to_string();
        }
        serde_json::Value::Array(items) => {
            for item in items {
                normalise(item);
            }
        }
        serde_json::Value::Object(map) => {
            // serde_json's default map is a BTreeMap, so serialisation is
            // already key-sorted; only the values need trimming.
            for (_, v) in map.iter_mut() {
                normalise(v);
            }
        }
        _ => {}
    }
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_digest_is_stable_and_short() {
        let a = digest12(b"hello world");
        let b = digest12(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_key_carries_prefix() {
        let key = content_key(b"asset bytes");
        assert!(key.starts_with("content-hash-"));
        assert_eq!(key.len(), "content-hash-".len() + 12);
    }

    #[test]
    fn structural_fingerprint_ignores_whitespace_and_key_order() {
        let a: serde_json::Value = serde_json::from_str(
            r#"{"title": "  Essay Rubric ", "points": 10, "rows": ["clarity ", "depth"]}"#,
        )
        .unwrap();
        let b: serde_json::Value = serde_json::from_str(
            r#"{"rows": ["clarity", " depth"], "points": 10, "title": "Essay Rubric"}"#,
        )
        .unwrap();
        assert_eq!(structural16(&a).unwrap(), structural16(&b).unwrap());
    }

    #[test]
    fn structural_fingerprint_distinguishes_values() {
        let a = serde_json::json!({"points": 10});
        let b = serde_json::json!({"points": 12});
        assert_ne!(structural16(&a).unwrap(), structural16(&b).unwrap());
    }
}
