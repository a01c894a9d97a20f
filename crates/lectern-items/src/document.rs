//! Items manager backed by a revision-tracked document store.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use lectern_store::{
    ContentHasher, DocumentStore, PersistedEntry, RangeQuery, SearchQuery, StoreAdapter,
    StoreError,
};
use lectern_types::{DocId, ManagerId, OrderKey, Revision};

use crate::changes::ChangeNotifier;
use crate::error::{ItemsError, ItemsResult};
use crate::manager::{Item, ItemsManager, PageStream};
use crate::refs::{ObjectRef, RefKey};
use crate::stream::{flatten, take_items};

/// Page size of `list` when the caller does not choose one.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 40;

/// How objects of one kind map onto stored entries.
pub trait EntryCodec<T>: Send + Sync + 'static {
    /// Kind tag; also the first component of every id.
    fn kind(&self) -> &str;

    /// Normalized sort key; the second component of every id.
    fn sort_key(&self, object: &T) -> String;

    /// Denormalized fields stored next to the object for search.
    fn derived_fields(&self, _object: &T) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Whether new ids end with a hash of the content instead of a random
    /// suffix, making identical content converge on one id.
    fn content_addressed(&self) -> bool {
        false
    }

    /// Field paths searched; empty means the kind is not searchable.
    fn search_fields(&self) -> &[&'static str] {
        &[]
    }
}

/// Where a [`DocumentStoreManager`] finds its store.
///
/// Resolved on every call, since the backing may change with configuration.
#[async_trait]
pub trait StoreHandle: Send + Sync + 'static {
    async fn store(&self) -> ItemsResult<Arc<dyn DocumentStore>>;

    fn readonly(&self) -> bool;

    /// Adapter the next [`store`](StoreHandle::store) call will return.
    fn adapter(&self) -> StoreAdapter;
}

/// A [`StoreHandle`] over one fixed store.
pub struct FixedStore {
    store: Arc<dyn DocumentStore>,
    readonly: AtomicBool,
}

impl FixedStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            readonly: AtomicBool::new(false),
        })
    }

    pub fn set_readonly(&self, readonly: bool) {
        self.readonly.store(readonly, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreHandle for FixedStore {
    async fn store(&self) -> ItemsResult<Arc<dyn DocumentStore>> {
        Ok(self.store.clone())
    }

    fn readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    fn adapter(&self) -> StoreAdapter {
        self.store.adapter()
    }
}

/// Items persisted as entries of one kind in a [`DocumentStore`].
///
/// Refs are transient views rebuilt from the store on every `list` or
/// `search`; their identity is the document id plus revision.
///
/// # Writes
///
/// - `add` of a content-addressed kind that collides with an existing entry
///   holding the same content returns a ref to that entry instead of failing.
///   If the entry was since updated to other content, the object is written
///   under a fresh random suffix.
/// - `update` reuses the previous id while the sort key is unchanged;
///   otherwise the object moves to a new id and the old one is tombstoned.
///   A failed tombstone is logged and tolerated.
pub struct DocumentStoreManager<T, C> {
    id: ManagerId,
    this: Weak<Self>,
    notifier: ChangeNotifier,
    codec: Arc<C>,
    handle: Arc<dyn StoreHandle>,
    _object: PhantomData<fn() -> T>,
}

impl<T, C> DocumentStoreManager<T, C>
where
    T: Item + Serialize + DeserializeOwned,
    C: EntryCodec<T>,
{
    pub fn new(codec: C, handle: Arc<dyn StoreHandle>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ManagerId::next(),
            this: this.clone(),
            notifier: ChangeNotifier::new(),
            codec: Arc::new(codec),
            handle,
            _object: PhantomData,
        })
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn weak(&self) -> Weak<dyn ItemsManager<T>> {
        self.this.clone()
    }

    fn make_ref(&self, object: T, id: DocId, revision: Revision) -> ObjectRef<T> {
        ObjectRef::new(
            object,
            OrderKey::text(id.as_str()),
            RefKey::Document { id, revision },
            self.weak(),
            self.id,
        )
    }

    async fn writable_store(&self) -> ItemsResult<Arc<dyn DocumentStore>> {
        if self.handle.readonly() {
            return Err(ItemsError::ReadOnly);
        }
        self.handle.store().await
    }

    /// Build the entry to write for `object`, updating `previous` if given.
    fn to_entry(
        &self,
        object: &T,
        previous: Option<&ObjectRef<T>>,
    ) -> ItemsResult<PersistedEntry> {
        let codec = &self.codec;
        let kind = codec.kind();
        let sort_key = codec.sort_key(object);
        let body = serde_json::to_value(object)?;

        let (id, revision) = match previous.map(|p| &p.key) {
            Some(RefKey::Document { id, revision }) if id.has_prefix(kind, &sort_key) => {
                (id.clone(), Some(revision.clone()))
            }
            _ => {
                let suffix = if codec.content_addressed() {
                    ContentHasher::ENTRY
                        .hash_kind_json(kind, &body)
                        .map_err(ItemsError::from)?
                        .to_hex()
                } else {
                    uuid::Uuid::now_v7().simple().to_string()
                };
                (DocId::new(kind, &sort_key, &suffix), None)
            }
        };

        let mut entry = PersistedEntry::new(id, kind, body).with_revision(revision);
        entry.fields = codec.derived_fields(object);
        Ok(entry)
    }

    async fn tombstone(&self, store: &dyn DocumentStore, item: &ObjectRef<T>) -> ItemsResult<()> {
        let RefKey::Document { id, revision } = &item.key else {
            return Ok(());
        };
        let tomb = PersistedEntry::tombstone(id.clone(), self.codec.kind(), revision.clone());
        store.put(tomb).await?;
        Ok(())
    }

    /// Check that `item` is still the stored version: a removed document
    /// makes the ref stale, a newer revision is a conflict.
    async fn ensure_current(&self, store: &dyn DocumentStore, item: &ObjectRef<T>) -> ItemsResult<()> {
        let RefKey::Document { id, revision } = &item.key else {
            return Err(ItemsError::StaleReference(
                "ref was not issued by a document manager".into(),
            ));
        };
        match store.get(id).await {
            Ok(current) if current.revision.as_ref() == Some(revision) => Ok(()),
            Ok(_) => Err(ItemsError::Conflict { id: id.to_string() }),
            Err(StoreError::NotFound(_)) => {
                Err(ItemsError::StaleReference(format!("{id} was removed")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn decode_ref<T, C>(
    codec: &C,
    manager: &Weak<dyn ItemsManager<T>>,
    manager_id: ManagerId,
    entry: PersistedEntry,
    order_key: Option<OrderKey>,
) -> ItemsResult<ObjectRef<T>>
where
    T: Item + DeserializeOwned,
    C: EntryCodec<T>,
{
    let Some(revision) = entry.revision else {
        return Err(ItemsError::Serialization(format!(
            "stored {} entry {} has no revision",
            codec.kind(),
            entry.id
        )));
    };
    let object: T = serde_json::from_value(entry.object)?;
    let order_key = order_key.unwrap_or_else(|| OrderKey::text(entry.id.as_str()));
    Ok(ObjectRef::new(
        object,
        order_key,
        RefKey::Document {
            id: entry.id,
            revision,
        },
        manager.clone(),
        manager_id,
    ))
}

struct ListState {
    cursor: Option<DocId>,
    done: bool,
}

#[async_trait]
impl<T, C> ItemsManager<T> for DocumentStoreManager<T, C>
where
    T: Item + Serialize + DeserializeOwned,
    C: EntryCodec<T>,
{
    fn id(&self) -> ManagerId {
        self.id
    }

    fn changes(&self) -> &ChangeNotifier {
        &self.notifier
    }

    fn readonly(&self) -> bool {
        self.handle.readonly()
    }

    async fn add(&self, object: T) -> ItemsResult<ObjectRef<T>> {
        let store = self.writable_store().await?;
        let mut entry = self.to_entry(&object, None)?;
        let id = entry.id.clone();
        let item = match store.put(entry.clone()).await {
            Ok(res) => self.make_ref(object, res.id, res.revision),
            Err(StoreError::Conflict { .. }) if self.codec.content_addressed() => {
                let existing = store.get(&id).await?;
                if existing.object == entry.object {
                    debug!(kind = self.codec.kind(), %id, "content already stored, reusing entry");
                    decode_ref(&*self.codec, &self.weak(), self.id, existing, None)?
                } else {
                    // The hashed id was updated in place since; it no longer holds this content.
                    let suffix = uuid::Uuid::now_v7().simple().to_string();
                    entry.id = DocId::new(id.kind(), id.sort_key(), &suffix);
                    debug!(
                        kind = self.codec.kind(),
                        from = %id,
                        to = %entry.id,
                        "hashed id holds other content, writing under a fresh id"
                    );
                    let res = store.put(entry).await?;
                    self.make_ref(object, res.id, res.revision)
                }
            }
            Err(e) => return Err(e.into()),
        };
        self.mark_change().await?;
        Ok(item)
    }

    async fn remove(&self, item: &ObjectRef<T>) -> ItemsResult<()> {
        let store = self.writable_store().await?;
        if item.manager_id() != self.id {
            return Ok(());
        }
        match self.tombstone(&*store, item).await {
            Ok(()) => {}
            Err(ItemsError::Conflict { .. }) | Err(ItemsError::NotFound(_)) => {
                debug!(kind = self.codec.kind(), "remove of a stale ref ignored");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.mark_change().await
    }

    async fn update(&self, item: &ObjectRef<T>, object: T) -> ItemsResult<ObjectRef<T>> {
        let store = self.writable_store().await?;
        let previous_id = match &item.key {
            RefKey::Document { id, .. } if item.manager_id() == self.id => id.clone(),
            _ => {
                return Err(ItemsError::StaleReference(format!(
                    "ref does not belong to manager {}",
                    self.id
                )))
            }
        };
        let entry = self.to_entry(&object, Some(item))?;
        let renamed = entry.id != previous_id;
        if renamed {
            self.ensure_current(&*store, item).await?;
        }

        let res = match store.put(entry).await {
            Ok(res) => res,
            Err(StoreError::Conflict { id }) if !renamed => {
                self.ensure_current(&*store, item).await?;
                return Err(ItemsError::Conflict { id });
            }
            Err(e) => return Err(e.into()),
        };

        if renamed {
            debug!(from = %previous_id, to = %res.id, "entry moved, tombstoning old id");
            if let Err(e) = self.tombstone(&*store, item).await {
                warn!(id = %previous_id, error = %e, "failed to tombstone renamed entry");
            }
        }

        let updated = self.make_ref(object, res.id, res.revision);
        self.mark_change().await?;
        Ok(updated)
    }

    fn list(&self, page_size: Option<usize>) -> PageStream<T> {
        let limit = page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE).max(1);
        let handle = self.handle.clone();
        let codec = self.codec.clone();
        let manager = self.weak();
        let manager_id = self.id;
        let state = ListState {
            cursor: None,
            done: false,
        };
        stream::unfold(state, move |mut st| {
            let handle = handle.clone();
            let codec = codec.clone();
            let manager = manager.clone();
            async move {
                if st.done {
                    return None;
                }
                let page = async {
                    let store = handle.store().await?;
                    let query = RangeQuery::kind(codec.kind(), limit).after(st.cursor.clone());
                    Ok::<_, ItemsError>(store.range_scan(query).await?)
                }
                .await;
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                };
                st.done = page.next_cursor.is_none();
                st.cursor = page.next_cursor;
                let refs = page
                    .entries
                    .into_iter()
                    .map(|entry| decode_ref(&*codec, &manager, manager_id, entry, None))
                    .collect::<ItemsResult<Vec<_>>>();
                if refs.is_err() {
                    st.done = true;
                }
                Some((refs, st))
            }
        })
        .boxed()
    }

    fn can_search(&self) -> bool {
        self.handle.adapter() == StoreAdapter::Local && !self.codec.search_fields().is_empty()
    }

    fn search(&self, text: &str, page_size: Option<usize>) -> PageStream<T> {
        if !self.can_search() {
            return stream::empty().boxed();
        }
        let handle = self.handle.clone();
        let codec = self.codec.clone();
        let manager = self.weak();
        let manager_id = self.id;
        let query = SearchQuery::new(codec.kind(), codec.search_fields(), text);
        let hits = stream::once(async move {
            let store = handle.store().await?;
            let hits = store.search(query).await?;
            hits.into_iter()
                .map(|hit| {
                    let key = OrderKey::number(-hit.score);
                    decode_ref(&*codec, &manager, manager_id, hit.entry, Some(key))
                })
                .collect::<ItemsResult<Vec<_>>>()
        })
        .boxed();
        take_items(
            flatten(hits),
            page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE),
        )
    }

    async fn update_search_index(&self) -> ItemsResult<()> {
        if !self.can_search() {
            return Ok(());
        }
        let store = self.handle.store().await?;
        let fields: Vec<String> = self
            .codec
            .search_fields()
            .iter()
            .map(|f| f.to_string())
            .collect();
        store.build_search_index(self.codec.kind(), &fields).await?;
        Ok(())
    }
}

impl<T, C: EntryCodec<T>> std::fmt::Debug for DocumentStoreManager<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStoreManager")
            .field("id", &self.id)
            .field("kind", &self.codec.kind())
            .finish()
    }
}
