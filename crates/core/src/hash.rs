#![forbid(unsafe_code)]

use sha2::Digest;
use std::fmt::Write as _;

/// Length of a lower-hex SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(HASH_HEX_LEN);
    for b in digest.as_slice() {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// True for a 64-char lower-hex string. Upper-case digests are not honored:
/// object keys are compared byte-for-byte.
pub fn is_hash(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex(b"hello\n"),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn is_hash_accepts_lower_hex_only() {
        let h = sha256_hex(b"x");
        assert!(is_hash(&h));
        assert!(!is_hash(&h.to_uppercase()));
        assert!(!is_hash(&h[..63]));
        assert!(!is_hash(""));
    }
}
