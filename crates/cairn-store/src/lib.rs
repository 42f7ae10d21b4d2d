//! Content-addressed storage of structure elements for Cairn.
//!
//! A [`StructureElement`] is the persisted form of one committed object: its
//! type tag, serialized bytes, leaf flag and the keys of the objects it links
//! to. Its key is the content hash of the bytes, so an element can be
//! verified wherever it travels.
//!
//! All backends implement the [`ElementStore`] trait:
//!
//! - [`InMemoryElementStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Elements are immutable once written.
//! 2. A store miss means "not resident here", never "does not exist".
//! 3. Stores never interpret element values.
//! 4. Every element is verified before it is accepted.

pub mod element;
pub mod error;
pub mod memory;
pub mod traits;

pub use element::StructureElement;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryElementStore;
pub use traits::ElementStore;
