use async_trait::async_trait;

use lectern_types::DocId;

use crate::entry::{
    ChangesPage, ChangesQuery, PersistedEntry, PutResult, RangePage, RangeQuery, SearchHit,
    SearchQuery, StoreAdapter,
};
use crate::error::StoreResult;

/// Revision-tracked document store.
///
/// All implementations must satisfy these invariants:
/// - `put` is an optimistic-concurrency write: it fails with
///   [`StoreError::Conflict`](crate::StoreError::Conflict) unless the entry's
///   revision is the stored one (`None` for an id that is absent or deleted).
/// - `get` and `range_scan` never return tombstones.
/// - `range_scan` returns entries sorted by id.
/// - Every call that crosses the I/O boundary may fail with
///   [`StoreError::Unavailable`](crate::StoreError::Unavailable); nothing
///   here retries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Whether this store's data is local or reached remotely.
    fn adapter(&self) -> StoreAdapter;

    /// Write a new version of `entry.id`, returning its new revision.
    async fn put(&self, entry: PersistedEntry) -> StoreResult<PutResult>;

    /// Read the current live version of a document.
    async fn get(&self, id: &DocId) -> StoreResult<PersistedEntry>;

    /// Read one page of live documents within an id range.
    async fn range_scan(&self, query: RangeQuery) -> StoreResult<RangePage>;

    /// Full-text search over one kind. Local adapters only.
    async fn search(&self, query: SearchQuery) -> StoreResult<Vec<SearchHit>>;

    /// Build or refresh the index used by [`DocumentStore::search`] for
    /// `kind` over `fields`. Idempotent. Local adapters only.
    async fn build_search_index(&self, kind: &str, fields: &[String]) -> StoreResult<()>;

    /// Read the change feed after sequence `since`, tombstones included.
    async fn changes(&self, query: ChangesQuery) -> StoreResult<ChangesPage>;

    /// Store a version written by another replica, keeping whichever of the
    /// local and incoming revisions wins. Returns `true` if the incoming
    /// version was kept.
    async fn put_replica(&self, entry: PersistedEntry) -> StoreResult<bool>;

    /// Release the connection. Later calls fail with `Unavailable`.
    async fn close(&self) -> StoreResult<()>;

    /// Close and erase all data held by this store.
    async fn destroy(&self) -> StoreResult<()>;

    /// Convenience: the first page of live entries of `kind`.
    async fn list_kind(&self, kind: &str, limit: usize) -> StoreResult<RangePage> {
        self.range_scan(RangeQuery::kind(kind, limit)).await
    }
}
