use std::collections::BTreeMap;
use std::path::Path;

use cairn_repo::PackedStructure;
use cairn_store::StructureElement;
use cairn_types::ObjectId;
use tracing::debug;

use crate::entry::EntryHeader;
use crate::error::{PackError, PackResult};
use crate::writer::decode_varint;
use crate::{PACK_MAGIC, PACK_VERSION};

/// Magic + version + root key + element count.
const HEADER_LEN: usize = 4 + 4 + 32 + 4;
const TRAILER_LEN: usize = 32;

/// A fully parsed and verified pack.
///
/// Parsing checks the trailer checksum, every entry's CRC and size, and that
/// every element's value hashes to its key. Nothing is handed out from a
/// pack that fails any of these.
pub struct PackReader {
    root: ObjectId,
    elements: BTreeMap<ObjectId, StructureElement>,
}

impl PackReader {
    pub fn open(path: &Path) -> PackResult<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "pack file too short".into(),
            });
        }

        if &data[0..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(PACK_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(&data[0..4]).into_owned(),
            });
        }

        let version = u32::from_be_bytes(read_array(data, 4)?);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let body_end = data.len() - TRAILER_LEN;
        let computed = blake3::hash(&data[..body_end]);
        if computed.as_bytes() != &data[body_end..] {
            return Err(PackError::ChecksumMismatch);
        }

        let root = ObjectId::from_hash(read_array(data, 8)?);
        let count = u32::from_be_bytes(read_array(data, 40)?) as usize;

        let mut elements = BTreeMap::new();
        let mut pos = HEADER_LEN;
        for _ in 0..count {
            let (element, next) = read_entry(&data[..body_end], pos)?;
            elements.insert(element.key, element);
            pos = next;
        }
        if pos != body_end {
            return Err(PackError::CorruptEntry {
                offset: pos as u64,
                reason: "trailing bytes after last entry".into(),
            });
        }

        debug!(%root, element_count = elements.len(), "pack read");
        Ok(Self { root, elements })
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, key: &ObjectId) -> bool {
        self.elements.contains_key(key)
    }

    pub fn get(&self, key: &ObjectId) -> Option<&StructureElement> {
        self.elements.get(key)
    }

    pub fn elements(&self) -> impl Iterator<Item = &StructureElement> {
        self.elements.values()
    }

    /// Hand the contents over as a [`PackedStructure`], ready for
    /// `Repository::unpack_structure`.
    pub fn into_structure(self) -> PackResult<PackedStructure> {
        if !self.elements.contains_key(&self.root) {
            return Err(PackError::MissingRoot(self.root));
        }
        Ok(PackedStructure {
            root: self.root,
            elements: self.elements,
        })
    }
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> PackResult<[u8; N]> {
    data.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PackError::CorruptEntry {
            offset: offset as u64,
            reason: "unexpected end of pack".into(),
        })
}

fn read_slice(data: &[u8], offset: usize, len: usize) -> PackResult<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| PackError::CorruptEntry {
            offset: offset as u64,
            reason: "unexpected end of pack".into(),
        })
}

fn read_varint(data: &[u8], pos: usize) -> PackResult<(usize, usize)> {
    let (value, used) = decode_varint(data.get(pos..).unwrap_or_default()).map_err(|e| match e {
        PackError::CorruptEntry { reason, .. } => PackError::CorruptEntry {
            offset: pos as u64,
            reason,
        },
        other => other,
    })?;
    Ok((value as usize, pos + used))
}

/// Parse one entry starting at `pos`. Returns the element and the offset of
/// the next entry.
fn read_entry(data: &[u8], pos: usize) -> PackResult<(StructureElement, usize)> {
    let (header_len, pos) = read_varint(data, pos)?;
    let header = EntryHeader::decode(read_slice(data, pos, header_len)?)?;
    let pos = pos + header_len;

    let (size, pos) = read_varint(data, pos)?;
    let (compressed_len, pos) = read_varint(data, pos)?;
    let compressed = read_slice(data, pos, compressed_len)?;
    let pos = pos + compressed_len;

    let crc = u32::from_be_bytes(read_array(data, pos)?);
    if crc32fast::hash(compressed) != crc {
        return Err(PackError::CrcMismatch { key: header.key });
    }
    let pos = pos + 4;

    let value =
        zstd::decode_all(compressed).map_err(|e| PackError::DecompressionFailed(e.to_string()))?;
    if value.len() != size {
        return Err(PackError::ElementMismatch {
            key: header.key,
            reason: format!("size mismatch: header says {size}, got {}", value.len()),
        });
    }

    let element = header.into_element(value);
    element.verify().map_err(|e| PackError::ElementMismatch {
        key: element.key,
        reason: e.to_string(),
    })?;
    Ok((element, pos))
}
