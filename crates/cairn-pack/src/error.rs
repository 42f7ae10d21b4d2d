use cairn_types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid pack magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("pack checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for element {key}")]
    CrcMismatch { key: ObjectId },

    /// The entry decoded cleanly but its value does not hash to its key.
    #[error("element {key} does not match its content: {reason}")]
    ElementMismatch { key: ObjectId, reason: String },

    #[error("root element {0} is not in the pack")]
    MissingRoot(ObjectId),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type PackResult<T> = Result<T, PackError>;
