//! Canonical JSON encoding and content hashing.
//!
//! Checksums and fingerprints must be byte-stable across processes, so
//! objects are written with keys in lexicographic order regardless of how
//! `serde_json` was built. Floats are written with the shortest round-trip
//! representation; JSON cannot carry NaN or infinities, so every encodable
//! number is finite.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Encodes a value as canonical JSON bytes.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the value cannot be represented as
/// JSON (for example, a map with non-string keys).
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(Error::serialization)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out.into_bytes())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).map_err(Error::serialization)?);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out)?;
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).map_err(Error::serialization)?),
    }
    Ok(())
}

/// Hex-encoded SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 of the canonical encoding of `value`.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the value cannot be encoded.
pub fn checksum<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(sha256_hex(&to_canonical_bytes(value)?))
}
