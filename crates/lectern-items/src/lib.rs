//! Uniform item management for Lectern.
//!
//! Every collection of objects, whether held in memory, persisted in a
//! document store, or assembled from other collections, is exposed through
//! the [`ItemsManager`] trait: mutations, lazy paginated listing, optional
//! full-text search and payload-free change notification.
//!
//! # Managers
//!
//! - [`MemoryManager`] -- ordered in-memory list with [`MemoryHooks`]
//! - [`DocumentStoreManager`] -- one kind of entry in a
//!   [`DocumentStore`](lectern_store::DocumentStore), with content-addressed
//!   dedup and rename-on-update
//! - [`FilteredManager`] -- predicate view that writes through to its parent
//! - [`MergeManager`] -- read-only k-way merge of several managers
//!
//! # Streams
//!
//! `list` and `search` return a [`PageStream`]. The combinators in
//! [`stream`] flatten, filter, re-batch and merge such streams, and
//! [`to_partial_list`] turns one into an immutable [`PartialList`] snapshot
//! for incremental display.

pub mod changes;
pub mod document;
pub mod error;
pub mod filtered;
pub mod manager;
pub mod memory;
pub mod merge;
pub mod partial;
pub mod refs;
pub mod stream;

pub use changes::{BatchGuard, ChangeNotifier, Subscription};
pub use document::{DocumentStoreManager, EntryCodec, FixedStore, StoreHandle, DEFAULT_LIST_PAGE_SIZE};
pub use error::{ItemsError, ItemsResult};
pub use filtered::FilteredManager;
pub use manager::{Item, ItemsManager, PageStream};
pub use memory::{MemoryHooks, MemoryManager, NoHooks};
pub use merge::MergeManager;
pub use partial::{to_partial_list, PartialList};
pub use refs::{by_order_key, ObjectRef, RefKey};
pub use stream::DEFAULT_PAGE_SIZE;
