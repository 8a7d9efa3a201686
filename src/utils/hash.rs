//! Stable content hashing for cache keys.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the input.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_and_distinct() {
        let a = sha256_hex("https://example.com/a");
        let b = sha256_hex("https://example.com/b");
        assert_eq!(a, sha256_hex("https://example.com/a"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
