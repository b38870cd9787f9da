//! Deterministic cache keys.

use crate::metadata::CacheEntryType;
use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in a key (64 bits).
const DIGEST_PREFIX_LEN: usize = 16;

/// Build the key for `(entry_type, logical_id)`: `"<type>:<sha256 prefix>"`.
///
/// The same logical entity always maps to the same slot, so repeated puts
/// replace rather than accumulate.
pub fn cache_key(entry_type: CacheEntryType, logical_id: &str) -> String {
    let digest = Sha256::digest(logical_id.as_bytes());
    let hex = hex::encode(digest);
    format!("{}:{}", entry_type.as_str(), &hex[..DIGEST_PREFIX_LEN])
}
