//! Content fingerprints used for dedup short-circuits.
//!
//! Both fingerprints are lowercase hex SHA-256 digests. The text
//! fingerprint is computed over [`normalize_text`] so that case and
//! whitespace differences between two extractions of the same content do
//! not defeat the exact-match lookup.

use sha2::{Digest, Sha256};

/// SHA-256 of the raw file bytes.
pub fn binary_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of [`normalize_text`]`(text)`.
pub fn text_fingerprint(text: &str) -> String {
    let normalized = normalize_text(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase, unify line endings, collapse whitespace runs to one space, trim.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lowered = unified.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_fingerprint_known_value() {
        assert_eq!(
            binary_fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_binary_fingerprint_sensitive_to_bytes() {
        assert_ne!(binary_fingerprint(b"Hello"), binary_fingerprint(b"hello"));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  Hello\r\n\r\n  WORLD\t\tagain \r end  "),
            "hello world again end"
        );
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_text_fingerprint_ignores_case_and_spacing() {
        let a = text_fingerprint("The Quick  brown\r\nfox");
        let b = text_fingerprint("the quick brown\nFOX   ");
        assert_eq!(a, b);
        assert_ne!(a, text_fingerprint("the quick brown dog"));
    }

    #[test]
    fn test_fingerprints_deterministic() {
        let text = "Deterministic input.";
        assert_eq!(text_fingerprint(text), text_fingerprint(text));
        assert_eq!(
            binary_fingerprint(text.as_bytes()),
            binary_fingerprint(text.as_bytes())
        );
    }
}
