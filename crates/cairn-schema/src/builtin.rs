//! Record types the version-control engine itself is built from.
//!
//! All of them live in the `cairn` package and are registered in every
//! [`TypeRegistry`](crate::TypeRegistry).

use crate::descriptor::MessageDescriptor;
use crate::value::ScalarType;

pub const PACKAGE: &str = "cairn";

/// Reference to another object by key.
pub mod link {
    use crate::tag::TypeTag;

    pub const NAME: &str = "Link";
    pub const KEY: &str = "key";
    pub const TYPE_PACKAGE: &str = "type_package";
    pub const TYPE_NAME: &str = "type_name";
    pub const IS_LEAF: &str = "isleaf";

    pub fn tag() -> TypeTag {
        TypeTag::new(super::PACKAGE, NAME)
    }
}

/// Immutable history record pointing at an object root.
pub mod commit_ref {
    use crate::tag::TypeTag;

    pub const NAME: &str = "CommitRef";
    pub const DATE: &str = "date";
    pub const COMMENT: &str = "comment";
    pub const OBJECT_ROOT: &str = "objectroot";
    pub const PARENT_REFS: &str = "parentrefs";

    pub fn tag() -> TypeTag {
        TypeTag::new(super::PACKAGE, NAME)
    }
}

/// Edge from a commit to one of its parents.
pub mod parent_ref {
    use crate::tag::TypeTag;

    pub const NAME: &str = "ParentRef";
    pub const COMMIT_REF: &str = "commitref";
    pub const RELATIONSHIP: &str = "relationship";

    pub fn tag() -> TypeTag {
        TypeTag::new(super::PACKAGE, NAME)
    }
}

pub mod branch {
    use crate::tag::TypeTag;

    pub const NAME: &str = "Branch";
    pub const BRANCH_KEY: &str = "branchkey";
    pub const COMMIT_REFS: &str = "commitrefs";

    pub fn tag() -> TypeTag {
        TypeTag::new(super::PACKAGE, NAME)
    }
}

/// Per-repository branch table. Lives outside the commit graph.
pub mod mutable_root {
    use crate::tag::TypeTag;

    pub const NAME: &str = "MutableRoot";
    pub const REPOSITORY_KEY: &str = "repositorykey";
    pub const BRANCHES: &str = "branches";

    pub fn tag() -> TypeTag {
        TypeTag::new(super::PACKAGE, NAME)
    }
}

pub(crate) fn descriptors() -> Vec<MessageDescriptor> {
    vec![
        MessageDescriptor::new(link::tag())
            .scalar(link::KEY, ScalarType::Str)
            .scalar(link::TYPE_PACKAGE, ScalarType::Str)
            .scalar(link::TYPE_NAME, ScalarType::Str)
            .scalar(link::IS_LEAF, ScalarType::Bool),
        MessageDescriptor::new(commit_ref::tag())
            .required_scalar(commit_ref::DATE, ScalarType::Int)
            .scalar(commit_ref::COMMENT, ScalarType::Str)
            .link(commit_ref::OBJECT_ROOT)
            .repeated_composite(commit_ref::PARENT_REFS, parent_ref::tag()),
        MessageDescriptor::new(parent_ref::tag())
            .link(parent_ref::COMMIT_REF)
            .scalar(parent_ref::RELATIONSHIP, ScalarType::Int),
        MessageDescriptor::new(branch::tag())
            .scalar(branch::BRANCH_KEY, ScalarType::Str)
            .repeated_link(branch::COMMIT_REFS),
        MessageDescriptor::new(mutable_root::tag())
            .scalar(mutable_root::REPOSITORY_KEY, ScalarType::Str)
            .repeated_composite(mutable_root::BRANCHES, branch::tag()),
    ]
}
