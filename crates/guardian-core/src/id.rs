//! Identifier helpers.
//!
//! Random ids are prefixed lowercase ULIDs, so they sort by creation time.
//! Content ids are truncated SHA-256 digests of canonical JSON.

use serde::Serialize;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::canonical::to_canonical_bytes;
use crate::error::Result;

/// Prefix for proposal ids.
pub const PROPOSAL_ID_PREFIX: &str = "atp_";
/// Prefix for proposal fingerprints.
pub const FINGERPRINT_PREFIX: &str = "gatfp_";
/// Prefix for evaluation run ids.
pub const EVALUATION_RUN_ID_PREFIX: &str = "evr_";

/// Digest bytes kept in a content id (24 hex chars).
const CONTENT_ID_BYTES: usize = 12;

/// Generates a time-sortable id with the given prefix.
#[must_use]
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{prefix}{}", Ulid::new().to_string().to_ascii_lowercase())
}

/// Generates a new proposal id (`atp_...`).
#[must_use]
pub fn proposal_id() -> String {
    prefixed_ulid(PROPOSAL_ID_PREFIX)
}

/// Generates a new evaluation run id (`evr_...`).
#[must_use]
pub fn evaluation_run_id() -> String {
    prefixed_ulid(EVALUATION_RUN_ID_PREFIX)
}

/// Derives a deterministic content id from the canonical encoding of `value`.
///
/// # Errors
///
/// Returns an error if `value` cannot be encoded as JSON.
pub fn content_id<T: Serialize + ?Sized>(prefix: &str, value: &T) -> Result<String> {
    let hash = Sha256::digest(to_canonical_bytes(value)?);
    let hex = hex::encode(hash.get(..CONTENT_ID_BYTES).unwrap_or(&hash));
    Ok(format!("{prefix}{hex}"))
}
