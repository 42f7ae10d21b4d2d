//! Reflection collaborator for Cairn.
//!
//! The version-control engine never assumes a concrete message encoding. It
//! only needs to know, for a record type, which fields exist, whether each is
//! scalar, composite or repeated, and how to turn a record into bytes and
//! back. This crate provides exactly that as a table-driven registry plus a
//! dynamic [`Record`] type.
//!
//! # Modules
//!
//! - [`tag`] -- [`TypeTag`], the identity of a record type
//! - [`value`] -- scalar [`Value`]s and their [`ScalarType`]s
//! - [`descriptor`] -- [`FieldDescriptor`] / [`MessageDescriptor`] tables
//! - [`registry`] -- [`TypeRegistry`], including the engine's built-in types
//! - [`record`] -- [`Record`], [`FieldData`] and [`FieldPath`] navigation
//! - [`builtin`] -- field names of the built-in engine types

pub mod builtin;
pub mod descriptor;
pub mod error;
pub mod record;
pub mod registry;
pub mod tag;
pub mod value;

pub use descriptor::{FieldDescriptor, FieldKind, MessageDescriptor};
pub use error::{SchemaError, SchemaResult};
pub use record::{FieldData, FieldPath, PathSegment, Record};
pub use registry::TypeRegistry;
pub use tag::TypeTag;
pub use value::{ScalarType, Value};
