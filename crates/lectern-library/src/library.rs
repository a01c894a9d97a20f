use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use lectern_items::{
    DocumentStoreManager, ItemsError, ItemsManager, ItemsResult, ObjectRef, StoreHandle,
};
use lectern_store::{
    replicate, sync, DocumentStore, InMemoryDocumentStore, ReplicationReport, StoreAdapter,
    StoreError, StoreResult,
};

use crate::config::LibraryConfig;
use crate::error::LibraryResult;
use crate::models::{Song, SongCodec, SongsList, SongsListCodec};

/// Opens the stores that back libraries.
#[async_trait]
pub trait StoreOpener: Send + Sync + 'static {
    /// The local store of library `library_id`, created empty if missing.
    async fn open_local(&self, library_id: &str) -> StoreResult<Arc<dyn DocumentStore>>;

    async fn open_remote(&self, url: &str) -> StoreResult<Arc<dyn DocumentStore>>;

    /// Erase the local data of library `library_id`.
    async fn destroy_local(&self, library_id: &str) -> StoreResult<()>;
}

/// Opens in-memory stores; remotes are looked up by URL and can be made
/// unreachable.
#[derive(Debug, Default)]
pub struct MemoryStoreOpener {
    locals: Mutex<BTreeMap<String, Arc<InMemoryDocumentStore>>>,
    remotes: Mutex<BTreeMap<String, Arc<InMemoryDocumentStore>>>,
    unreachable: Mutex<BTreeSet<String>>,
}

impl MemoryStoreOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The remote at `url`, created empty on first use.
    pub fn remote(&self, url: &str) -> Arc<InMemoryDocumentStore> {
        self.remotes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(InMemoryDocumentStore::remote(url)))
            .clone()
    }

    /// The local store of a library, if it was ever opened.
    pub fn local(&self, library_id: &str) -> Option<Arc<InMemoryDocumentStore>> {
        self.locals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(library_id)
            .cloned()
    }

    pub fn set_reachable(&self, url: &str, reachable: bool) {
        let mut unreachable = self.unreachable.lock().unwrap_or_else(PoisonError::into_inner);
        if reachable {
            unreachable.remove(url);
        } else {
            unreachable.insert(url.to_string());
        }
    }
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Unavailable("store table lock poisoned".into())
}

#[async_trait]
impl StoreOpener for MemoryStoreOpener {
    async fn open_local(&self, library_id: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = self
            .locals
            .lock()
            .map_err(poisoned)?
            .entry(library_id.to_string())
            .or_insert_with(|| Arc::new(InMemoryDocumentStore::new(format!("local:{library_id}"))))
            .clone();
        store.set_available(true);
        Ok(store)
    }

    async fn open_remote(&self, url: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        if self.unreachable.lock().map_err(poisoned)?.contains(url) {
            return Err(StoreError::Unavailable(url.to_string()));
        }
        let store = self.remote(url);
        store.set_available(true);
        Ok(store)
    }

    async fn destroy_local(&self, library_id: &str) -> StoreResult<()> {
        let store = self.locals.lock().map_err(poisoned)?.remove(library_id);
        if let Some(store) = store {
            store.destroy().await?;
        }
        Ok(())
    }
}

/// Opens local stores as JSON snapshot files under one directory. Remotes
/// are never reachable.
#[derive(Clone, Debug)]
pub struct FileStoreOpener {
    dir: PathBuf,
}

impl FileStoreOpener {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Snapshot file of library `library_id`.
    pub fn path_for(&self, library_id: &str) -> PathBuf {
        let safe: String = library_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("library-{safe}.json"))
    }
}

#[async_trait]
impl StoreOpener for FileStoreOpener {
    async fn open_local(&self, library_id: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(Arc::new(InMemoryDocumentStore::open(self.path_for(library_id))?))
    }

    async fn open_remote(&self, url: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        Err(StoreError::Unavailable(format!("remote {url} is not reachable")))
    }

    async fn destroy_local(&self, library_id: &str) -> StoreResult<()> {
        let path = self.path_for(library_id);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// The store behind one library, opened on first use and reopened after
/// the configuration changes its backing.
pub struct LibraryBacking {
    config: RwLock<LibraryConfig>,
    store: tokio::sync::Mutex<Option<Arc<dyn DocumentStore>>>,
    opener: Arc<dyn StoreOpener>,
}

impl LibraryBacking {
    fn new(config: LibraryConfig, opener: Arc<dyn StoreOpener>) -> Self {
        Self {
            config: RwLock::new(config),
            store: tokio::sync::Mutex::new(None),
            opener,
        }
    }

    pub fn config(&self) -> LibraryConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace_config(&self, config: LibraryConfig) -> LibraryConfig {
        std::mem::replace(&mut *self.config.write().unwrap_or_else(PoisonError::into_inner), config)
    }

    /// Close the open store, if any. The next access reopens one.
    async fn close_store(&self) -> StoreResult<()> {
        let store = self.store.lock().await.take();
        match store {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreHandle for LibraryBacking {
    async fn store(&self) -> ItemsResult<Arc<dyn DocumentStore>> {
        let config = self.config();
        if !config.local_enabled && !config.remote_enabled {
            return Err(ItemsError::BackingUnavailable(format!(
                "library {} has neither a local nor a remote store",
                config.id
            )));
        }
        let mut slot = self.store.lock().await;
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store = if config.local_enabled {
            self.opener.open_local(&config.id).await?
        } else {
            self.opener.open_remote(&config.remote_url).await?
        };
        debug!(library = %config.id, adapter = ?store.adapter(), "library store opened");
        *slot = Some(store.clone());
        Ok(store)
    }

    fn readonly(&self) -> bool {
        self.config.read().unwrap_or_else(PoisonError::into_inner).readonly
    }

    fn adapter(&self) -> StoreAdapter {
        if self.config.read().unwrap_or_else(PoisonError::into_inner).local_enabled {
            StoreAdapter::Local
        } else {
            StoreAdapter::Remote
        }
    }
}

/// One configured song library: a songs manager and a songs-lists manager
/// over the same store.
pub struct Library {
    backing: Arc<LibraryBacking>,
    songs: Arc<DocumentStoreManager<Song, SongCodec>>,
    songs_lists: Arc<DocumentStoreManager<SongsList, SongsListCodec>>,
}

impl Library {
    pub fn new(config: LibraryConfig, opener: Arc<dyn StoreOpener>) -> Arc<Self> {
        let backing = Arc::new(LibraryBacking::new(config, opener));
        let handle: Arc<dyn StoreHandle> = backing.clone();
        Arc::new(Self {
            songs: DocumentStoreManager::new(SongCodec, handle.clone()),
            songs_lists: DocumentStoreManager::new(SongsListCodec, handle),
            backing,
        })
    }

    pub fn config(&self) -> LibraryConfig {
        self.backing.config()
    }

    pub fn id(&self) -> String {
        self.backing.config.read().unwrap_or_else(PoisonError::into_inner).id.clone()
    }

    pub fn readonly(&self) -> bool {
        self.backing.readonly()
    }

    pub fn songs(&self) -> Arc<dyn ItemsManager<Song>> {
        self.songs.clone()
    }

    pub fn songs_lists(&self) -> Arc<dyn ItemsManager<SongsList>> {
        self.songs_lists.clone()
    }

    pub fn is_synchronizable(&self) -> bool {
        self.backing.config.read().unwrap_or_else(PoisonError::into_inner).is_synchronizable()
    }

    /// Add songs under a single notification. Songs already present are
    /// returned as their existing entries.
    pub async fn import_songs(&self, songs: Vec<Song>) -> LibraryResult<Vec<ObjectRef<Song>>> {
        let count = songs.len();
        let refs = self.songs.add_all(songs).await?;
        info!(library = %self.id(), count, "songs imported");
        Ok(refs)
    }

    /// Apply a new configuration. The id never changes. An open store is
    /// closed when the new configuration is backed differently.
    pub async fn reconfigure(&self, config: LibraryConfig) {
        let config = LibraryConfig {
            id: self.id(),
            ..config
        };
        let previous = self.backing.replace_config(config.clone());
        if previous.backing_changed(&config) {
            info!(library = %config.id, "library backing changed");
            if let Err(e) = self.backing.close_store().await {
                warn!(library = %config.id, error = %e, "failed to close library store");
            }
        }
    }

    /// Release the open store.
    pub async fn close(&self) -> LibraryResult<()> {
        self.backing.close_store().await?;
        Ok(())
    }

    /// Close the store and erase the local data.
    pub async fn destroy(&self) -> LibraryResult<()> {
        let id = self.id();
        self.backing.close_store().await?;
        self.backing.opener.destroy_local(&id).await?;
        info!(library = %id, "library destroyed");
        Ok(())
    }

    /// Replicate with the remote: pull only when read-only, both ways
    /// otherwise. Returns `None` when the library is not synchronizable.
    pub async fn synchronize(&self) -> LibraryResult<Option<ReplicationReport>> {
        let config = self.config();
        if !config.is_synchronizable() {
            return Ok(None);
        }
        let local = self.backing.store().await?;
        let remote = self.backing.opener.open_remote(&config.remote_url).await?;
        let report = if config.readonly {
            replicate(&*remote, &*local, 0).await?
        } else {
            sync(&*local, &*remote).await?
        };
        info!(
            library = %config.id,
            read = report.docs_read,
            written = report.docs_written,
            "library synchronized"
        );
        self.refresh().await;
        Ok(Some(report))
    }

    /// Rebuild the search index and tell listeners both managers changed.
    async fn refresh(&self) {
        if let Err(e) = self.songs.update_search_index().await {
            warn!(library = %self.id(), error = %e, "failed to rebuild search index");
        }
        if let Err(e) = self.songs.mark_change().await {
            warn!(library = %self.id(), error = %e, "songs change notification failed");
        }
        if let Err(e) = self.songs_lists.mark_change().await {
            warn!(library = %self.id(), error = %e, "songs lists change notification failed");
        }
    }

    pub fn dispose(&self) {
        self.songs.dispose();
        self.songs_lists.dispose();
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("config", &self.config())
            .finish()
    }
}
