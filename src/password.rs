//! Credential hashing
//!
//! SHA-256 over the raw password, hex encoded. Deterministic, no salt:
//! stored digests must stay comparable across restarts.

use sha2::{Digest, Sha256};

/// Hash a password into a 64-character lowercase hex digest
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a candidate password against a stored digest
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password) == stored_hash
}
