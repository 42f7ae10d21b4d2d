use crate::tag::TypeTag;

/// Errors from schema lookups and record access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown record type: {0}")]
    UnknownType(TypeTag),

    #[error("record type {tag} has no field named {field:?}")]
    UnknownField { tag: TypeTag, field: String },

    #[error("field {field:?}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("path {0} does not resolve to a record")]
    InvalidPath(String),

    #[error("index {index} out of range for field {field:?} of length {len}")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;
