use std::sync::atomic::{AtomicU64, Ordering};

use cairn_schema::{FieldPath, TypeTag, Value};
use cairn_types::LocalId;

use crate::arena::NodeId;

/// Identity of one [`Repository`](crate::Repository) instance in this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RepositoryId(u64);

impl RepositoryId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to a record inside the repository's object graph.
///
/// `node` is the root of the composite tree that owns the record and `path`
/// addresses a nested record inside it (the empty path is the root itself).
/// Handles are cheap to copy and never keep anything alive: once the node is
/// discarded, every operation through the handle fails with `InvalidAccess`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub(crate) repository: RepositoryId,
    pub(crate) node: NodeId,
    pub(crate) path: FieldPath,
}

impl ObjectHandle {
    pub(crate) fn root(repository: RepositoryId, node: NodeId) -> Self {
        Self {
            repository,
            node,
            path: FieldPath::root(),
        }
    }

    pub(crate) fn nested(&self, path: FieldPath) -> Self {
        Self {
            repository: self.repository,
            node: self.node,
            path,
        }
    }

    /// Returns `true` if this handle addresses the root of its tree.
    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    /// Handle to the root of the tree this record belongs to.
    pub fn root_of(&self) -> ObjectHandle {
        Self::root(self.repository, self.node)
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Address of one link record: the node that owns it plus the path to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkAddr {
    pub owner: NodeId,
    pub path: FieldPath,
}

impl LinkAddr {
    pub fn new(owner: NodeId, path: FieldPath) -> Self {
        Self { owner, path }
    }
}

/// Decoded contents of a link record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub key: Option<LocalId>,
    pub type_tag: Option<TypeTag>,
    pub isleaf: bool,
}

/// Result of reading a field through [`Repository::get_field`](crate::Repository::get_field).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A singular scalar; unset fields read as the type's default.
    Scalar(Value),
    /// A repeated scalar field.
    Scalars(Vec<Value>),
    /// A nested structural record.
    Message(ObjectHandle),
    /// The resolved target of a link field.
    Linked(ObjectHandle),
    /// A repeated composite field of the given length. Use the containers.
    Repeated(usize),
    /// A composite or link field that has not been set.
    Unset,
}
