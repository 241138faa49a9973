use sha2::{Digest, Sha256};

use crate::types::RawRecord;

/// Hex SHA-256 of the raw records exactly as fetched (compact JSON encoding).
pub fn payload_sha256(records: &[RawRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        // Value -> JSON cannot fail: keys are always strings
        let bytes = serde_json::to_vec(record).unwrap_or_default();
        hasher.update(&bytes);
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Stable key for "this source delivered this payload for this region".
///
/// Two runs with the same fingerprint wrote identical rows, since upserts are idempotent.
pub fn run_fingerprint(source: &str, region_code: &str, payload_sha256_hex: &str) -> String {
    let mut s = String::new();
    s.push_str(source);
    s.push('|');
    s.push_str(&region_code.to_uppercase());
    s.push('|');
    s.push_str(payload_sha256_hex);

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}
