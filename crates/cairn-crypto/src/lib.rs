//! Content hashing for Cairn.
//!
//! The hash of an element's serialized bytes is its identity once committed.
//! Hashing wraps BLAKE3; there is no custom cryptography here.

pub mod hasher;

pub use hasher::ContentHasher;
