//! Content fingerprinting for frame payloads.

use sha2::{Digest, Sha256};

use crate::types::ContentHash;

/// Length in hex characters of every fingerprint produced here.
pub const HASH_HEX_LEN: usize = 64;

/// Hash a frame payload into a lowercase hex SHA-256 digest.
///
/// Deterministic and side-effect free; used as the cache key and as the
/// input to the similarity filter.
pub fn hash_payload(payload: &[u8]) -> ContentHash {
    let digest = Sha256::digest(payload);
    ContentHash(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let payload = b"frame bytes";
        assert_eq!(hash_payload(payload), hash_payload(payload));
    }

    #[test]
    fn test_hash_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            hash_payload(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_fixed_length_lowercase_hex() {
        let hash = hash_payload(&[0xff; 4096]);
        assert_eq!(hash.as_str().len(), HASH_HEX_LEN);
        assert!(hash
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_different_payloads_differ() {
        assert_ne!(hash_payload(b"frame-a"), hash_payload(b"frame-b"));
    }
}
