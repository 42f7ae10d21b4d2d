use std::collections::BTreeSet;

use cairn_crypto::ContentHasher;
use cairn_schema::TypeTag;
use cairn_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The persisted, content-addressed unit for one committed object.
///
/// Fields are public so elements can be rebuilt from a transport or pack
/// format. Anything rebuilt that way must pass [`StructureElement::verify`]
/// before it is trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureElement {
    /// Content hash of `value`.
    pub key: ObjectId,
    /// Record type of the serialized object.
    pub type_tag: TypeTag,
    /// The serialized record.
    pub value: Vec<u8>,
    /// `true` if the object has no outgoing links.
    pub isleaf: bool,
    /// Keys of the objects this one links to.
    pub child_keys: BTreeSet<ObjectId>,
}

impl StructureElement {
    /// Build an element, computing its key from `value`.
    pub fn from_parts(
        type_tag: TypeTag,
        value: Vec<u8>,
        isleaf: bool,
        child_keys: BTreeSet<ObjectId>,
    ) -> Self {
        let key = ContentHasher::ELEMENT.hash(&value);
        Self {
            key,
            type_tag,
            value,
            isleaf,
            child_keys,
        }
    }

    /// Check that `key` is still the hash of `value`.
    pub fn verify(&self) -> StoreResult<()> {
        let computed = ContentHasher::ELEMENT.hash(&self.value);
        if computed != self.key {
            return Err(StoreError::HashMismatch {
                key: self.key,
                computed,
            });
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(value: &[u8]) -> StructureElement {
        StructureElement::from_parts(
            TypeTag::new("test", "Person"),
            value.to_vec(),
            true,
            BTreeSet::new(),
        )
    }

    #[test]
    fn key_is_content_hash_of_value() {
        let el = element(b"{\"name\":\"x\"}");
        assert_eq!(el.key, ContentHasher::ELEMENT.hash(b"{\"name\":\"x\"}"));
        assert!(el.verify().is_ok());
    }

    #[test]
    fn identical_values_share_a_key() {
        assert_eq!(element(b"same").key, element(b"same").key);
        assert_ne!(element(b"same").key, element(b"other").key);
    }

    #[test]
    fn tampered_value_fails_verification() {
        let mut el = element(b"original");
        el.value = b"tampered".to_vec();
        let err = el.verify().unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { key, .. } if key == element(b"original").key));
    }

    #[test]
    fn serde_roundtrip_preserves_child_keys() {
        let mut children = BTreeSet::new();
        children.insert(ObjectId::from_bytes(b"a"));
        children.insert(ObjectId::from_bytes(b"b"));
        let el = StructureElement::from_parts(TypeTag::new("t", "T"), b"v".to_vec(), false, children);
        let json = serde_json::to_string(&el).unwrap();
        let back: StructureElement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, el);
        assert!(back.verify().is_ok());
    }
}
