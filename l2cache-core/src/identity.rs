//! Identity primitives shared by cache keys.
//!
//! Cache keys must hash identically in every process that reads the same
//! backing store, so hashing goes through SHA-256 rather than the std
//! `RandomState` hasher.

use sha2::{Digest, Sha256};

/// Logical timestamp produced by a region's timestamp source.
///
/// Only ordering matters; the value is not required to be wall-clock time.
pub type Timestamp = i64;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Process-independent 64-bit hash of a byte string.
pub fn stable_hash(content: &[u8]) -> u64 {
    let hash = compute_content_hash(content);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[0..8]);
    u64::from_be_bytes(prefix)
}

/// Fold one component hash into an accumulated hash (order sensitive).
pub fn combine_hash(acc: u64, component: u64) -> u64 {
    acc.wrapping_mul(37).wrapping_add(component)
}
