use cairn_schema::SchemaError;
use cairn_store::StoreError;
use cairn_types::ObjectId;

/// Errors from repository and object-graph operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepoError {
    /// The handle refers to a node that has been discarded.
    #[error("invalid access: object handle is stale")]
    InvalidAccess,

    #[error("object is read-only: cannot modify field {0:?}")]
    ReadOnlyViolation(String),

    /// Linking would make an object its own ancestor.
    #[error("recursive structure: linking would create a cycle")]
    RecursiveStructure,

    #[error("object belongs to a different repository")]
    CrossRepository,

    #[error("illegal link target: {0}")]
    IllegalLinkTarget(String),

    #[error("field {0:?} is not a link")]
    NotALink(String),

    #[error("corrupt object {key}: {reason}")]
    CorruptObject { key: ObjectId, reason: String },

    /// Not in the workspace, the commit index, or the local element cache.
    #[error("object not resident: {0}")]
    ObjectNotResident(String),

    #[error("invalid repository state: {0}")]
    InvalidRepositoryState(String),

    #[error("no such commit after visiting {visited} commit refs")]
    NoSuchCommit { visited: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("object has uncommitted changes")]
    NotCommitted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type RepoResult<T> = Result<T, RepoError>;
