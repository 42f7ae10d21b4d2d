use cairn_types::ObjectId;

/// Errors from element store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Stored bytes no longer hash to the element's key.
    #[error("hash mismatch for {key}: computed {computed}")]
    HashMismatch { key: ObjectId, computed: ObjectId },

    /// Attempted to write an element with the null key.
    #[error("cannot store element with null key")]
    NullKey,

    /// The backend is unavailable or refused the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
