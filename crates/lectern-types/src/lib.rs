//! Foundation types for Lectern.
//!
//! This crate provides the identity and ordering types shared by the document
//! store, the items managers and the library layer. Every other Lectern crate
//! depends on `lectern-types`.
//!
//! # Key Types
//!
//! - [`ContentHash`] -- BLAKE3 digest of an object's canonical content
//! - [`DocId`] -- `kind \x01 sortKey \x01 suffix` document identifier
//! - [`Revision`] -- optimistic-concurrency token (`generation-hash`)
//! - [`OrderKey`] -- manager-defined sort key used for merging streams
//! - [`ManagerId`] -- process-unique identity of an items manager

pub mod doc_id;
pub mod error;
pub mod hash;
pub mod order;
pub mod revision;

pub use doc_id::{DocId, KEY_SEPARATOR, RANGE_END};
pub use error::TypeError;
pub use hash::ContentHash;
pub use order::{ManagerId, OrderKey};
pub use revision::Revision;
