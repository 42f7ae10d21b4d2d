use std::collections::BTreeSet;

use cairn_schema::TypeTag;
use cairn_store::StructureElement;
use cairn_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{PackError, PackResult};

/// Everything about an element except its value. Stored uncompressed in
/// front of each entry's compressed value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub key: ObjectId,
    pub type_tag: TypeTag,
    pub isleaf: bool,
    pub child_keys: BTreeSet<ObjectId>,
}

impl EntryHeader {
    pub fn of(element: &StructureElement) -> Self {
        Self {
            key: element.key,
            type_tag: element.type_tag.clone(),
            isleaf: element.isleaf,
            child_keys: element.child_keys.clone(),
        }
    }

    /// Reassemble the element. The result is not verified.
    pub fn into_element(self, value: Vec<u8>) -> StructureElement {
        StructureElement {
            key: self.key,
            type_tag: self.type_tag,
            value,
            isleaf: self.isleaf,
            child_keys: self.child_keys,
        }
    }

    pub fn encode(&self) -> PackResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| PackError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> PackResult<Self> {
        bincode::deserialize(bytes).map_err(|e| PackError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> StructureElement {
        let child = ObjectId::from_bytes(b"child");
        StructureElement::from_parts(
            TypeTag::new("test", "Node"),
            b"{\"value\":1}".to_vec(),
            false,
            BTreeSet::from([child]),
        )
    }

    #[test]
    fn header_reassembles_the_element() {
        let original = element();
        let header = EntryHeader::decode(&EntryHeader::of(&original).encode().unwrap()).unwrap();
        let rebuilt = header.into_element(original.value.clone());
        assert_eq!(rebuilt, original);
        assert!(rebuilt.verify().is_ok());
    }

    #[test]
    fn garbage_header_is_a_serialization_error() {
        assert!(matches!(
            EntryHeader::decode(&[0xFF, 0x01]),
            Err(PackError::Serialization(_))
        ));
    }
}
