//! Versioned object graphs for Cairn.
//!
//! A [`Repository`] owns a graph of records connected by link fields. Objects
//! are edited in a workspace under ephemeral ids; committing serializes every
//! modified tree bottom-up into content-addressed
//! [`StructureElement`](cairn_store::StructureElement)s and records a commit
//! ref on the current branch. Branches, detached checkouts of historical
//! commits and merge-on-read of diverged heads are built on top.
//!
//! # Modules
//!
//! - [`repository`] -- state, field and link access, modification propagation,
//!   and commits
//! - [`branch`] -- branches, checkout, reset, merging and log
//! - [`containers`] -- views over repeated link, item and scalar fields
//! - [`history`] -- ancestor searches over the commit DAG
//! - [`packed`] -- self-contained bundles and store transfer
//! - [`config`] -- [`RepositoryConfig`]
//!
//! # Invariants
//!
//! 1. A committed object's key is the hash of its serialized bytes.
//! 2. Modifying an object marks every tree linking to it modified, up to the
//!    workspace root.
//! 3. Handles never outlive their node: after checkout or reset, old handles
//!    fail with [`RepoError::InvalidAccess`].
//! 4. Elements are verified every time they are loaded.

pub mod arena;
pub mod branch;
mod commit;
pub mod config;
pub mod containers;
pub mod error;
pub mod handle;
pub mod history;
mod links;
pub mod packed;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;

pub use arena::NodeId;
pub use branch::{BranchInfo, CheckoutOptions, CommitInfo, DETACHED_BRANCH_KEY, MERGE_BY_DATE_COMMENT};
pub use config::RepositoryConfig;
pub use containers::{ItemContainer, LinkContainer, ScalarContainer};
pub use error::{RepoError, RepoResult};
pub use handle::{FieldValue, LinkAddr, LinkInfo, ObjectHandle, RepositoryId};
pub use history::{CommitNode, Relationship, SearchOutcome};
pub use packed::{PackedCommits, PackedStructure};
pub use repository::{Repository, Status};
