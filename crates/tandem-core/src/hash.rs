//! Content hashes used for end-to-end sync verification.
//!
//! Clients hash their materialised text the same way and compare against the
//! `state_hash` returned with every accepted edit.

use sha2::{Digest, Sha256};

/// Length of every hash produced by [`state_hash`].
pub const STATE_HASH_LEN: usize = 64;

/// SHA-256 of the materialised text, lowercase hex.
pub fn state_hash(text: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(text.as_bytes());
  hex::encode(hasher.finalize())
}
