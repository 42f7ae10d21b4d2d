//! Pack file format for Cairn.
//!
//! A pack carries one [`PackedStructure`](cairn_repo::PackedStructure) between
//! repositories: the root key plus every element the root reaches, each
//! value zstd-compressed and CRC-checked, with a BLAKE3 checksum over the
//! whole file.
//!
//! # Layout
//!
//! - header: `CRNP` magic, version, root key, element count
//! - entries: bincode [`EntryHeader`], sizes as varints, compressed value, CRC32
//! - trailer: BLAKE3 of everything before it
//!
//! [`PackReader`] verifies every element against its key before exposing
//! it, so a pack either loads whole or not at all.

pub mod entry;
pub mod error;
pub mod reader;
pub mod writer;

pub use entry::EntryHeader;
pub use error::{PackError, PackResult};
pub use reader::PackReader;
pub use writer::{PackFile, PackWriter, DEFAULT_LEVEL};

pub const PACK_MAGIC: &[u8; 4] = b"CRNP";
pub const PACK_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use std::path::Path;

    use cairn_repo::{ObjectHandle, PackedStructure, Repository, RepositoryConfig};
    use cairn_schema::{MessageDescriptor, ScalarType, TypeRegistry, TypeTag, Value};
    use cairn_store::StructureElement;

    use super::*;

    fn node() -> TypeTag {
        TypeTag::new("test", "Node")
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new().with(
            MessageDescriptor::new(node())
                .scalar("label", ScalarType::Str)
                .link("child"),
        )
    }

    fn repo() -> Repository {
        Repository::new(registry(), RepositoryConfig::default())
    }

    /// Root -> child, committed.
    fn committed_pair(label: &str) -> (Repository, ObjectHandle) {
        let mut repo = repo();
        let root = repo.init_workspace(&node()).unwrap();
        repo.set_field(&root, "label", Value::from("root")).unwrap();
        let child = repo.create_object(&node()).unwrap();
        repo.set_field(&child, "label", Value::from(label)).unwrap();
        repo.set_linked(&root, "child", &child).unwrap();
        repo.commit_at("first", 10).unwrap();
        (repo, root)
    }

    fn packed(label: &str) -> PackedStructure {
        let (mut repo, root) = committed_pair(label);
        repo.pack_structure(&root).unwrap()
    }

    fn pack_bytes(structure: &PackedStructure) -> Vec<u8> {
        PackWriter::for_structure(Path::new("unused"), structure)
            .finish_to_bytes()
            .unwrap()
    }

    #[test]
    fn structure_roundtrip_in_memory() {
        let structure = packed("leaf");
        let reader = PackReader::from_bytes(&pack_bytes(&structure)).unwrap();
        assert_eq!(reader.root(), structure.root);
        assert_eq!(reader.len(), 2);
        for element in structure.elements.values() {
            assert_eq!(reader.get(&element.key), Some(element));
        }
        assert_eq!(reader.into_structure().unwrap(), structure);
    }

    #[test]
    fn unpacked_pack_is_readable_in_another_repository() {
        let structure = packed("leaf");
        let reader = PackReader::from_bytes(&pack_bytes(&structure)).unwrap();

        let mut target = repo();
        let copy = target.unpack_structure(reader.into_structure().unwrap()).unwrap();
        let child = target.get_linked(&copy, "child").unwrap().unwrap();
        assert_eq!(target.get_scalar(&child, "label").unwrap(), Value::from("leaf"));
        assert!(target.is_read_only(&copy).unwrap());
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let structure = packed("on disk");

        let written = PackWriter::for_structure(&dir.path().join("book"), &structure)
            .finish()
            .unwrap();
        assert_eq!(written.element_count, 2);
        assert_eq!(written.root, structure.root);
        assert!(written.pack_path.ends_with("book.pack"));

        let reader = PackReader::open(&written.pack_path).unwrap();
        assert_eq!(reader.into_structure().unwrap(), structure);
    }

    #[test]
    fn bad_magic() {
        let mut bytes = pack_bytes(&packed("leaf"));
        bytes[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            PackReader::from_bytes(&bytes),
            Err(PackError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn bad_version() {
        let mut bytes = pack_bytes(&packed("leaf"));
        bytes[4..8].copy_from_slice(&99u32.to_be_bytes());
        assert!(matches!(
            PackReader::from_bytes(&bytes),
            Err(PackError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            PackReader::from_bytes(b"CRNP"),
            Err(PackError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = pack_bytes(&packed("leaf"));
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        assert!(matches!(
            PackReader::from_bytes(&bytes),
            Err(PackError::ChecksumMismatch)
        ));
    }

    #[test]
    fn element_not_matching_its_key_is_rejected() {
        let mut structure = packed("leaf");
        let child_key = *structure
            .elements
            .keys()
            .find(|k| **k != structure.root)
            .unwrap();
        if let Some(child) = structure.elements.get_mut(&child_key) {
            child.value = b"{\"label\":\"forged\"}".to_vec();
        }
        // The checksum is recomputed by the writer, so only the per-element
        // hash check can catch this.
        let bytes = pack_bytes(&structure);
        assert!(matches!(
            PackReader::from_bytes(&bytes),
            Err(PackError::ElementMismatch { key, .. }) if key == child_key
        ));
    }

    #[test]
    fn root_must_be_present() {
        let mut structure = packed("leaf");
        let root = structure.root;
        structure.elements.remove(&root);
        let reader = PackReader::from_bytes(&pack_bytes(&structure)).unwrap();
        assert!(!reader.contains(&root));
        assert!(matches!(reader.into_structure(), Err(PackError::MissingRoot(r)) if r == root));
    }

    #[test]
    fn large_values_compress() {
        let big = StructureElement::from_parts(node(), vec![b'a'; 64 * 1024], true, Default::default());
        let mut writer = PackWriter::new(Path::new("unused"), big.key);
        writer.add(big.clone());
        let bytes = writer.finish_to_bytes().unwrap();
        assert!(bytes.len() < big.value.len() / 10);

        let reader = PackReader::from_bytes(&bytes).unwrap();
        assert_eq!(reader.get(&big.key), Some(&big));
    }

    #[test]
    fn empty_pack() {
        let root = cairn_types::ObjectId::null();
        let writer = PackWriter::new(Path::new("unused"), root);
        assert!(writer.is_empty());
        let reader = PackReader::from_bytes(&writer.finish_to_bytes().unwrap()).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.elements().count(), 0);
    }
}
