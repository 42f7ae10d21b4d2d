use cairn_types::ObjectId;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so element keys never collide with digests computed for
/// other purposes (pack checksums, repository keys).
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for structure elements. Every committed object key comes from here.
    pub const ELEMENT: Self = Self {
        domain: "cairn-element-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ObjectId::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected key.
    pub fn verify(&self, data: &[u8], expected: &ObjectId) -> bool {
        self.hash(data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"serialized record";
        assert_eq!(ContentHasher::ELEMENT.hash(data), ContentHasher::ELEMENT.hash(data));
    }

    #[test]
    fn different_content_produces_different_keys() {
        assert_ne!(
            ContentHasher::ELEMENT.hash(b"a"),
            ContentHasher::ELEMENT.hash(b"b")
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let id = ContentHasher::ELEMENT.hash(b"original");
        assert!(ContentHasher::ELEMENT.verify(b"original", &id));
        assert!(!ContentHasher::ELEMENT.verify(b"tampered", &id));
    }

    #[test]
    fn domain_separates_from_plain_digest() {
        let data = b"data";
        assert_ne!(ContentHasher::ELEMENT.hash(data), ObjectId::from_bytes(data));
        assert_ne!(
            ContentHasher::new("other-v1").hash(data),
            ContentHasher::ELEMENT.hash(data)
        );
        assert_eq!(ContentHasher::ELEMENT.domain(), "cairn-element-v1");
    }
}
