use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lectern_types::{DocId, Revision};

use crate::entry::{
    ChangesPage, ChangesQuery, PersistedEntry, PutResult, RangePage, RangeQuery, SearchHit,
    SearchQuery, StoreAdapter,
};
use crate::error::{StoreError, StoreResult};
use crate::search::SearchIndex;
use crate::traits::DocumentStore;

/// In-memory, `BTreeMap`-based document store.
///
/// Backs local libraries in tests and in the CLI (where it is mirrored to a
/// JSON snapshot file after every write), and stands in for a remote replica
/// when built with [`InMemoryDocumentStore::remote`]. Availability can be
/// switched off to simulate an unreachable backend.
pub struct InMemoryDocumentStore {
    name: String,
    adapter: StoreAdapter,
    available: AtomicBool,
    snapshot: Option<PathBuf>,
    state: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    docs: BTreeMap<String, StoredDoc>,
    seq: u64,
    indexes: Vec<SearchIndex>,
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredDoc {
    seq: u64,
    entry: PersistedEntry,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    seq: u64,
    docs: Vec<StoredDoc>,
}

impl InMemoryDocumentStore {
    /// Create a new empty local store.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_adapter(name, StoreAdapter::Local)
    }

    /// Create a new empty store that reports itself as remote.
    pub fn remote(name: impl Into<String>) -> Self {
        Self::with_adapter(name, StoreAdapter::Remote)
    }

    fn with_adapter(name: impl Into<String>, adapter: StoreAdapter) -> Self {
        Self {
            name: name.into(),
            adapter,
            available: AtomicBool::new(true),
            snapshot: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Open a local store mirrored to `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new(path.display().to_string());
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            let state = store.state.get_mut().map_err(poisoned)?;
            state.seq = snapshot.seq;
            for doc in snapshot.docs {
                state.docs.insert(doc.entry.id.as_str().to_string(), doc);
            }
            debug!(path = %path.display(), docs = state.docs.len(), "store snapshot loaded");
        }
        store.snapshot = Some(path);
        Ok(store)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make every later call succeed (`true`) or fail with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live (non-deleted) documents.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .map(|s| s.docs.values().filter(|d| !d.entry.deleted).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a document including tombstones, bypassing availability.
    pub fn raw(&self, id: &DocId) -> Option<PersistedEntry> {
        let state = self.state.read().ok()?;
        state.docs.get(id.as_str()).map(|d| d.entry.clone())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(self.name.clone()))
        }
    }

    fn check_local(&self, operation: &'static str) -> StoreResult<()> {
        match self.adapter {
            StoreAdapter::Local => Ok(()),
            StoreAdapter::Remote => Err(StoreError::Unsupported(operation)),
        }
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snapshot = Snapshot {
            seq: state.seq,
            docs: state.docs.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn commit(&self, state: &mut StoreState, entry: PersistedEntry) -> StoreResult<()> {
        state.seq += 1;
        for index in &mut state.indexes {
            index.upsert(&entry);
        }
        let seq = state.seq;
        state
            .docs
            .insert(entry.id.as_str().to_string(), StoredDoc { seq, entry });
        self.persist(state)
    }
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Unavailable("store lock poisoned".into())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn adapter(&self) -> StoreAdapter {
        self.adapter
    }

    async fn put(&self, mut entry: PersistedEntry) -> StoreResult<PutResult> {
        self.check_available()?;
        let mut state = self.state.write().map_err(poisoned)?;
        let stored = state.docs.get(entry.id.as_str()).map(|d| &d.entry);

        let content = entry.revision_content();
        let revision = match (stored, &entry.revision) {
            (None, None) => Revision::first(&content),
            (Some(current), None) if current.deleted => current
                .revision
                .as_ref()
                .map(|r| r.next(&content))
                .unwrap_or_else(|| Revision::first(&content)),
            (Some(current), Some(expected)) if current.revision.as_ref() == Some(expected) => {
                expected.next(&content)
            }
            _ => {
                return Err(StoreError::Conflict {
                    id: entry.id.to_string(),
                })
            }
        };

        entry.revision = Some(revision.clone());
        let id = entry.id.clone();
        self.commit(&mut state, entry)?;
        Ok(PutResult { id, revision })
    }

    async fn get(&self, id: &DocId) -> StoreResult<PersistedEntry> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        match state.docs.get(id.as_str()) {
            Some(doc) if !doc.entry.deleted => Ok(doc.entry.clone()),
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn range_scan(&self, query: RangeQuery) -> StoreResult<RangePage> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        let lower = match &query.cursor {
            Some(cursor) => Bound::Excluded(cursor.as_str().to_string()),
            None => Bound::Included(query.start.clone()),
        };
        let upper = Bound::Included(query.end.clone());
        let entries: Vec<PersistedEntry> = state
            .docs
            .range::<String, _>((lower, upper))
            .map(|(_, doc)| &doc.entry)
            .filter(|entry| !entry.deleted)
            .take(query.limit)
            .cloned()
            .collect();
        let next_cursor = if query.limit > 0 && entries.len() >= query.limit {
            entries.last().map(|e| e.id.clone())
        } else {
            None
        };
        Ok(RangePage {
            entries,
            next_cursor,
        })
    }

    async fn search(&self, query: SearchQuery) -> StoreResult<Vec<SearchHit>> {
        self.check_available()?;
        self.check_local("search")?;
        let mut state = self.state.write().map_err(poisoned)?;
        let position = match state
            .indexes
            .iter()
            .position(|idx| idx.serves(&query.kind, &query.fields))
        {
            Some(position) => position,
            None => {
                let mut index = SearchIndex::new(query.kind.clone(), query.fields.clone());
                for doc in state.docs.values() {
                    index.upsert(&doc.entry);
                }
                state.indexes.push(index);
                state.indexes.len() - 1
            }
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        let hits = state.indexes[position]
            .query(&query.text)
            .into_iter()
            .filter_map(|(id, score)| {
                state.docs.get(&id).map(|doc| SearchHit {
                    entry: doc.entry.clone(),
                    score,
                })
            })
            .take(limit)
            .collect();
        Ok(hits)
    }

    async fn build_search_index(&self, kind: &str, fields: &[String]) -> StoreResult<()> {
        self.check_available()?;
        self.check_local("build_search_index")?;
        let mut state = self.state.write().map_err(poisoned)?;
        let mut index = SearchIndex::new(kind, fields.to_vec());
        for doc in state.docs.values() {
            index.upsert(&doc.entry);
        }
        debug!(store = %self.name, kind, docs = index.len(), "search index built");
        state.indexes.retain(|idx| !idx.serves(kind, fields));
        state.indexes.push(index);
        Ok(())
    }

    async fn changes(&self, query: ChangesQuery) -> StoreResult<ChangesPage> {
        self.check_available()?;
        let state = self.state.read().map_err(poisoned)?;
        let mut docs: Vec<&StoredDoc> = state
            .docs
            .values()
            .filter(|doc| doc.seq > query.since)
            .collect();
        docs.sort_by_key(|doc| doc.seq);
        docs.truncate(query.limit);
        let last_seq = docs.last().map(|doc| doc.seq).unwrap_or(query.since);
        Ok(ChangesPage {
            entries: docs.into_iter().map(|doc| doc.entry.clone()).collect(),
            last_seq,
        })
    }

    async fn put_replica(&self, entry: PersistedEntry) -> StoreResult<bool> {
        self.check_available()?;
        let Some(incoming) = entry.revision.clone() else {
            return Err(StoreError::Serialization(format!(
                "replicated entry {} has no revision",
                entry.id
            )));
        };
        let mut state = self.state.write().map_err(poisoned)?;
        let wins = match state
            .docs
            .get(entry.id.as_str())
            .and_then(|d| d.entry.revision.as_ref())
        {
            Some(current) => incoming > *current,
            None => true,
        };
        if wins {
            self.commit(&mut state, entry)?;
        }
        Ok(wins)
    }

    async fn close(&self) -> StoreResult<()> {
        self.set_available(false);
        debug!(store = %self.name, "store closed");
        Ok(())
    }

    async fn destroy(&self) -> StoreResult<()> {
        self.set_available(false);
        let mut state = self.state.write().map_err(poisoned)?;
        *state = StoreState::default();
        if let Some(path) = &self.snapshot {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        debug!(store = %self.name, "store destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDocumentStore")
            .field("name", &self.name)
            .field("adapter", &self.adapter)
            .field("live_docs", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn song(sort_key: &str, suffix: &str) -> PersistedEntry {
        PersistedEntry::new(
            DocId::new("song", sort_key, suffix),
            "song",
            json!({ "title": sort_key }),
        )
    }

    // -----------------------------------------------------------------------
    // Optimistic concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn put_then_get() {
        let store = InMemoryDocumentStore::new("t");
        let res = store.put(song("abide", "1")).await.unwrap();
        assert_eq!(res.revision.generation(), 1);
        let got = store.get(&res.id).await.unwrap();
        assert_eq!(got.revision, Some(res.revision));
        assert_eq!(got.object["title"], "abide");
    }

    #[tokio::test]
    async fn second_create_of_same_id_conflicts() {
        let store = InMemoryDocumentStore::new("t");
        store.put(song("abide", "1")).await.unwrap();
        let err = store.put(song("abide", "1")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_with_stale_revision_conflicts() {
        let store = InMemoryDocumentStore::new("t");
        let first = store.put(song("abide", "1")).await.unwrap();
        store
            .put(song("abide", "1").with_revision(Some(first.revision.clone())))
            .await
            .unwrap();
        let err = store
            .put(song("abide", "1").with_revision(Some(first.revision)))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn revision_for_missing_document_conflicts() {
        let store = InMemoryDocumentStore::new("t");
        let err = store
            .put(song("abide", "1").with_revision(Some(Revision::first(b"x"))))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn tombstone_hides_document_and_allows_recreate() {
        let store = InMemoryDocumentStore::new("t");
        let res = store.put(song("abide", "1")).await.unwrap();
        store
            .put(PersistedEntry::tombstone(res.id.clone(), "song", res.revision))
            .await
            .unwrap();
        assert!(store.get(&res.id).await.unwrap_err().is_not_found());
        assert!(store.is_empty());

        let again = store.put(song("abide", "1")).await.unwrap();
        assert_eq!(again.revision.generation(), 3);
    }

    // -----------------------------------------------------------------------
    // Range scans
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn range_scan_pages_by_cursor() {
        let store = InMemoryDocumentStore::new("t");
        for key in ["a", "b", "c", "d", "e"] {
            store.put(song(key, "1")).await.unwrap();
        }
        store
            .put(PersistedEntry::new(
                DocId::new("songslist", "a", "1"),
                "songslist",
                json!({}),
            ))
            .await
            .unwrap();

        let first = store.range_scan(RangeQuery::kind("song", 2)).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.next_cursor.clone();
        assert!(cursor.is_some());

        let second = store
            .range_scan(RangeQuery::kind("song", 2).after(cursor))
            .await
            .unwrap();
        assert_eq!(second.entries[0].id.sort_key(), "c");

        let third = store
            .range_scan(RangeQuery::kind("song", 2).after(second.next_cursor))
            .await
            .unwrap();
        assert_eq!(third.entries.len(), 1);
        assert!(third.next_cursor.is_none());
    }

    #[tokio::test]
    async fn range_scan_skips_tombstones() {
        let store = InMemoryDocumentStore::new("t");
        let a = store.put(song("a", "1")).await.unwrap();
        store.put(song("b", "1")).await.unwrap();
        store
            .put(PersistedEntry::tombstone(a.id, "song", a.revision))
            .await
            .unwrap();
        let page = store.range_scan(RangeQuery::kind("song", 10)).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].id.sort_key(), "b");
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn search_finds_by_title_and_tracks_updates() {
        let store = InMemoryDocumentStore::new("t");
        let fields = vec!["object.title".to_string()];
        store.build_search_index("song", &fields).await.unwrap();
        let res = store.put(song("grace", "1")).await.unwrap();
        store.put(song("glory", "1")).await.unwrap();

        let query = SearchQuery::new("song", &["object.title"], "grace");
        let hits = store.search(query.clone()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, res.id);

        store
            .put(PersistedEntry::tombstone(res.id, "song", res.revision))
            .await
            .unwrap();
        assert!(store.search(query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_adapter_refuses_search() {
        let store = InMemoryDocumentStore::remote("r");
        assert_eq!(store.adapter(), StoreAdapter::Remote);
        let err = store
            .search(SearchQuery::new("song", &["object.title"], "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    // -----------------------------------------------------------------------
    // Availability and lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryDocumentStore::new("t");
        store.set_available(false);
        let err = store.put(song("a", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_available(true);
        assert!(store.put(song("a", "1")).await.is_ok());
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let store = InMemoryDocumentStore::new("t");
        store.close().await.unwrap();
        assert!(store.list_kind("song", 10).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen_and_destroy_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        {
            let store = InMemoryDocumentStore::open(&path).unwrap();
            store.put(song("abide", "1")).await.unwrap();
        }
        let store = InMemoryDocumentStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        let next = store.put(song("b", "1")).await.unwrap();
        assert_eq!(next.revision.generation(), 1);

        store.destroy().await.unwrap();
        assert!(!path.exists());
    }

    // -----------------------------------------------------------------------
    // Change feed and replicas
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn changes_include_tombstones_in_sequence_order() {
        let store = InMemoryDocumentStore::new("t");
        let a = store.put(song("a", "1")).await.unwrap();
        store.put(song("b", "1")).await.unwrap();
        store
            .put(PersistedEntry::tombstone(a.id.clone(), "song", a.revision))
            .await
            .unwrap();
        let page = store
            .changes(ChangesQuery {
                since: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[1].id, a.id);
        assert!(page.entries[1].deleted);
        assert_eq!(page.last_seq, 3);
    }

    #[tokio::test]
    async fn put_replica_keeps_higher_revision() {
        let store = InMemoryDocumentStore::new("t");
        let local = store.put(song("a", "1")).await.unwrap();

        let older = song("a", "1").with_revision(Some(local.revision.clone()));
        assert!(!store.put_replica(older).await.unwrap());

        let newer_rev = local.revision.next(b"remote edit");
        let newer = song("a", "1").with_revision(Some(newer_rev.clone()));
        assert!(store.put_replica(newer).await.unwrap());
        assert_eq!(store.get(&local.id).await.unwrap().revision, Some(newer_rev));
    }
}
