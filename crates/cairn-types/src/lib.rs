//! Foundation types for Cairn.
//!
//! Every other Cairn crate depends on `cairn-types`. It defines the two
//! identifiers the object graph is keyed by.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Content-addressed key (32-byte digest of serialized bytes)
//! - [`LocalId`] -- Workspace key: an ephemeral counter value for uncommitted
//!   objects, or the content key once committed

pub mod error;
pub mod local;
pub mod object;

pub use error::TypeError;
pub use local::LocalId;
pub use object::ObjectId;
