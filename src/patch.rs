use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Spans above this size are verified by hash instead of by content.
const HASH_THRESHOLD: usize = 1024;

/// A single range replacement against a source object.
///
/// The selector is interpreted against the *source*; the planner takes care
/// of where the replacement lands once earlier patches change the length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub selector: Selector,
    pub replacement: Vec<u8>,
    /// What the replaced source bytes must look like, if checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Verification>,
}

impl Patch {
    pub fn new(selector: Selector, replacement: impl Into<Vec<u8>>) -> Self {
        Self {
            selector,
            replacement: replacement.into(),
            expected: None,
        }
    }

    /// Insert `bytes` at the front of the object.
    pub fn prepend(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Selector::up_to(0), bytes)
    }

    /// Insert `bytes` after the last byte of an object of `source_length`.
    pub fn append(source_length: usize, bytes: impl Into<Vec<u8>>) -> Self {
        let start = isize::try_from(source_length).unwrap_or(isize::MAX);
        Self::new(Selector::starting_at(start), bytes)
    }

    /// Remove the selected bytes.
    pub fn delete(selector: Selector) -> Self {
        Self::new(selector, Vec::new())
    }

    #[must_use]
    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.expected = Some(verification);
        self
    }

    /// Check `current` (the source bytes this patch consumes) against the
    /// expected content. Patches without an expectation always pass.
    pub fn verify(&self, current: &[u8]) -> bool {
        self.expected
            .as_ref()
            .map_or(true, |expected| expected.matches(current))
    }
}

/// Verification strategy for the bytes a patch replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum Verification {
    /// Exact byte match required
    ExactMatch(Vec<u8>),
    /// xxh3 hash of expected bytes (cheaper for large spans)
    Hash(u64),
}

impl Verification {
    pub fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            Verification::ExactMatch(expected) => bytes == expected.as_slice(),
            Verification::Hash(expected_hash) => xxh3_64(bytes) == *expected_hash,
        }
    }

    /// Create verification from bytes, using a hash for spans over 1KB.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() > HASH_THRESHOLD {
            Verification::Hash(xxh3_64(bytes))
        } else {
            Verification::ExactMatch(bytes.to_vec())
        }
    }

    pub fn hash(&self) -> u64 {
        match self {
            Verification::Hash(h) => *h,
            Verification::ExactMatch(bytes) => xxh3_64(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_exact_match() {
        let verify = Verification::ExactMatch(b"hello world".to_vec());
        assert!(verify.matches(b"hello world"));
        assert!(!verify.matches(b"hello"));
    }

    #[test]
    fn test_verification_hash() {
        let verify = Verification::Hash(xxh3_64(b"hello world"));
        assert!(verify.matches(b"hello world"));
        assert!(!verify.matches(b"goodbye world"));
        assert_eq!(verify.hash(), Verification::from_bytes(b"hello world").hash());
    }

    #[test]
    fn test_from_bytes_switches_to_hash_for_large_spans() {
        assert!(matches!(
            Verification::from_bytes(b"small"),
            Verification::ExactMatch(_)
        ));
        assert!(matches!(
            Verification::from_bytes(&[b'x'; 2000]),
            Verification::Hash(_)
        ));
    }

    #[test]
    fn test_unverified_patch_accepts_anything() {
        let patch = Patch::prepend("a");
        assert!(patch.verify(b""));
        assert!(patch.verify(b"whatever"));
    }

    #[test]
    fn test_append_selects_end_of_source() {
        let patch = Patch::append(11, "!");
        assert_eq!(patch.selector, Selector::starting_at(11));
    }
}
