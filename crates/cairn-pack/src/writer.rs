use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cairn_repo::PackedStructure;
use cairn_store::StructureElement;
use cairn_types::ObjectId;
use tracing::debug;

use crate::entry::EntryHeader;
use crate::error::{PackError, PackResult};
use crate::{PACK_MAGIC, PACK_VERSION};

/// Default zstd compression level.
pub const DEFAULT_LEVEL: i32 = 3;

/// Result of writing a pack file.
#[derive(Clone, Debug)]
pub struct PackFile {
    pub pack_path: PathBuf,
    pub root: ObjectId,
    pub element_count: usize,
    pub checksum: [u8; 32],
}

/// Builds a pack from a root key and the elements it reaches.
pub struct PackWriter {
    path: PathBuf,
    root: ObjectId,
    level: i32,
    elements: BTreeMap<ObjectId, StructureElement>,
}

impl PackWriter {
    /// Create a writer targeting the given base path.
    pub fn new(path: &Path, root: ObjectId) -> Self {
        Self {
            path: path.to_path_buf(),
            root,
            level: DEFAULT_LEVEL,
            elements: BTreeMap::new(),
        }
    }

    /// A writer holding every element of a packed structure.
    pub fn for_structure(path: &Path, packed: &PackedStructure) -> Self {
        let mut writer = Self::new(path, packed.root);
        for element in packed.elements.values() {
            writer.add(element.clone());
        }
        writer
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Queue an element. Adding the same key twice keeps one copy.
    pub fn add(&mut self, element: StructureElement) {
        self.elements.entry(element.key).or_insert(element);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Write the pack to `<path>.pack`.
    pub fn finish(self) -> PackResult<PackFile> {
        let pack_path = self.path.with_extension("pack");
        let root = self.root;
        let element_count = self.elements.len();
        let (bytes, checksum) = self.build_pack_bytes()?;
        std::fs::write(&pack_path, &bytes)?;
        debug!(path = %pack_path.display(), element_count, bytes = bytes.len(), "pack written");
        Ok(PackFile {
            pack_path,
            root,
            element_count,
            checksum,
        })
    }

    /// Build the pack in memory (no disk I/O).
    pub fn finish_to_bytes(self) -> PackResult<Vec<u8>> {
        Ok(self.build_pack_bytes()?.0)
    }

    fn build_pack_bytes(self) -> PackResult<(Vec<u8>, [u8; 32])> {
        let mut pack_data = Vec::new();

        // Header: magic + version + root key + element count
        pack_data.extend_from_slice(PACK_MAGIC);
        pack_data.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack_data.extend_from_slice(self.root.as_bytes());
        pack_data.extend_from_slice(&(self.elements.len() as u32).to_be_bytes());

        for element in self.elements.values() {
            let header = EntryHeader::of(element).encode()?;
            encode_varint(&mut pack_data, header.len() as u64);
            pack_data.extend_from_slice(&header);

            let compressed = zstd::encode_all(element.value.as_slice(), self.level)
                .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
            encode_varint(&mut pack_data, element.value.len() as u64);
            encode_varint(&mut pack_data, compressed.len() as u64);
            pack_data.extend_from_slice(&compressed);
            pack_data.extend_from_slice(&crc32fast::hash(&compressed).to_be_bytes());
        }

        // Trailer: BLAKE3 checksum of everything so far
        let checksum = *blake3::hash(&pack_data).as_bytes();
        pack_data.extend_from_slice(&checksum);
        Ok((pack_data, checksum))
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(PackError::CorruptEntry {
        offset: 0,
        reason: "truncated varint".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for value in [0, 127, 128, 1_000_000, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            assert_eq!(decode_varint(&buf).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn decode_varint_truncated() {
        let err = decode_varint(&[0x80]).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { .. }));
    }

    #[test]
    fn duplicate_elements_are_kept_once() {
        let element = StructureElement::from_parts(
            cairn_schema::TypeTag::new("test", "Leaf"),
            b"{}".to_vec(),
            true,
            Default::default(),
        );
        let mut writer = PackWriter::new(Path::new("unused"), element.key);
        writer.add(element.clone());
        writer.add(element);
        assert_eq!(writer.len(), 1);
    }
}
