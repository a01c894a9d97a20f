//! Revision-tracked document storage for Lectern.
//!
//! This crate defines the boundary between the items managers and whatever
//! holds the documents: a local database, or a remote replica reached over
//! the network. Every document lives in one shared keyspace under a
//! [`DocId`](lectern_types::DocId) and carries a
//! [`Revision`](lectern_types::Revision) used for optimistic concurrency.
//!
//! # Storage Backends
//!
//! All backends implement the [`DocumentStore`] trait:
//!
//! - [`InMemoryDocumentStore`] -- `BTreeMap`-based store, optionally mirrored
//!   to a JSON snapshot file, usable as a local or a remote adapter
//!
//! # Design Rules
//!
//! 1. A write must name the revision it replaces; any mismatch is a conflict.
//! 2. Deletion is a tombstone write, so it replicates like any other change.
//! 3. Range scans return live documents in id order.
//! 4. Search indices are local-only: remote adapters refuse to search.
//! 5. Replicas converge by keeping the highest revision of every id.

pub mod entry;
pub mod error;
pub mod hasher;
pub mod memory;
pub mod replicate;
pub mod search;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use entry::{
    ChangesPage, ChangesQuery, PersistedEntry, PutResult, RangePage, RangeQuery, SearchHit,
    SearchQuery, StoreAdapter,
};
pub use error::{StoreError, StoreResult};
pub use hasher::ContentHasher;
pub use memory::InMemoryDocumentStore;
pub use replicate::{replicate, sync, ReplicationReport};
pub use search::{normalize_text, SearchIndex};
pub use traits::DocumentStore;
