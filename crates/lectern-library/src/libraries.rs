//! The set of configured libraries and the merged views over them.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use lectern_items::{
    FilteredManager, ItemsError, ItemsManager, ItemsResult, MemoryHooks, MemoryManager,
    MergeManager, ObjectRef,
};
use lectern_store::ReplicationReport;

use crate::config::{library_order, LibraryConfig};
use crate::config_source::ConfigSource;
use crate::error::{LibraryError, LibraryResult};
use crate::library::{Library, StoreOpener};
use crate::models::{Song, SongsList};

/// Configuration key holding the list of library configurations.
pub const LIBRARIES_KEY: &str = "libraries";

/// Owns one [`Library`] per configuration entry and keeps the merged views
/// and the saved configuration in step with the entries.
pub struct LibraryHooks {
    opener: Arc<dyn StoreOpener>,
    source: Arc<dyn ConfigSource>,
    libraries: RwLock<BTreeMap<String, Arc<Library>>>,
    synchronizable: RwLock<Vec<Arc<Library>>>,
    songs: Arc<MergeManager<Song>>,
    songs_lists: Arc<MergeManager<SongsList>>,
    writable_songs_lists: Arc<MergeManager<SongsList>>,
}

impl LibraryHooks {
    fn new(source: Arc<dyn ConfigSource>, opener: Arc<dyn StoreOpener>) -> Self {
        Self {
            opener,
            source,
            libraries: RwLock::new(BTreeMap::new()),
            synchronizable: RwLock::new(Vec::new()),
            songs: MergeManager::new(),
            songs_lists: MergeManager::new(),
            writable_songs_lists: MergeManager::new(),
        }
    }

    pub fn library(&self, id: &str) -> Option<Arc<Library>> {
        self.libraries.read().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }

    /// Point the merged views at the enabled libraries, in library order.
    fn refresh(&self, configs: &[LibraryConfig]) {
        let mut ordered: Vec<&LibraryConfig> = configs.iter().collect();
        ordered.sort_by(|a, b| library_order(a, b));
        let in_order: Vec<Arc<Library>> = ordered
            .iter()
            .filter_map(|config| self.library(&config.id))
            .collect();

        let enabled: Vec<&Arc<Library>> = in_order
            .iter()
            .filter(|library| library.config().enabled)
            .collect();
        self.songs
            .set_managers(enabled.iter().map(|library| library.songs()).collect());
        self.songs_lists
            .set_managers(enabled.iter().map(|library| library.songs_lists()).collect());
        self.writable_songs_lists.set_managers(
            enabled
                .iter()
                .filter(|library| !library.readonly())
                .map(|library| library.songs_lists())
                .collect(),
        );

        *self.synchronizable.write().unwrap_or_else(PoisonError::into_inner) = in_order
            .iter()
            .filter(|library| library.is_synchronizable())
            .cloned()
            .collect();
    }

    async fn save(&self, configs: &[LibraryConfig]) -> LibraryResult<()> {
        self.source
            .set(LIBRARIES_KEY, serde_json::to_value(configs)?)
            .await
    }
}

fn poisoned<E>(_: E) -> ItemsError {
    ItemsError::BackingUnavailable("library table lock poisoned".into())
}

#[async_trait]
impl MemoryHooks<LibraryConfig> for LibraryHooks {
    async fn create_object(&self, config: LibraryConfig) -> ItemsResult<LibraryConfig> {
        let config = config.validate();
        let mut libraries = self.libraries.write().map_err(poisoned)?;
        if libraries.contains_key(&config.id) {
            return Err(ItemsError::Conflict { id: config.id });
        }
        libraries.insert(
            config.id.clone(),
            Library::new(config.clone(), self.opener.clone()),
        );
        info!(library = %config.id, name = %config.display_name, "library created");
        Ok(config)
    }

    async fn on_remove(&self, removed: &ObjectRef<LibraryConfig>) -> ItemsResult<()> {
        let library = self
            .libraries
            .write()
            .map_err(poisoned)?
            .remove(&removed.object.id);
        if let Some(library) = library {
            library.dispose();
            if let Err(e) = library.destroy().await {
                warn!(library = %removed.object.id, error = %e, "failed to destroy library data");
            }
        }
        Ok(())
    }

    async fn on_update(
        &self,
        current: &ObjectRef<LibraryConfig>,
        new_object: LibraryConfig,
    ) -> ItemsResult<LibraryConfig> {
        let config = LibraryConfig {
            id: current.object.id.clone(),
            ..new_object
        }
        .validate();
        if let Some(library) = self.library(&config.id) {
            library.reconfigure(config.clone()).await;
        }
        Ok(config)
    }

    async fn on_change(&self, items: Vec<ObjectRef<LibraryConfig>>) -> ItemsResult<()> {
        let configs: Vec<LibraryConfig> = items.into_iter().map(|r| r.object).collect();
        self.save(&configs).await?;
        self.refresh(&configs);
        Ok(())
    }
}

/// Outcome of [`Libraries::synchronize_all`].
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub synchronized: Vec<(String, ReplicationReport)>,
    pub failed: Vec<(String, LibraryError)>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Every configured library, plus merged views across them.
///
/// The configuration list is loaded from a [`ConfigSource`] and written back
/// on every change.
pub struct Libraries {
    configs: Arc<MemoryManager<LibraryConfig, LibraryHooks>>,
    writable_libraries: Arc<FilteredManager<LibraryConfig>>,
}

impl Libraries {
    pub async fn load(
        source: Arc<dyn ConfigSource>,
        opener: Arc<dyn StoreOpener>,
    ) -> LibraryResult<Self> {
        let stored: Vec<LibraryConfig> = match source.get(LIBRARIES_KEY).await? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };
        let configs = MemoryManager::with_hooks(LibraryHooks::new(source, opener));
        configs.internal_add_all(stored).await?;
        // Persist the validated entries and build the views once, without a
        // notification nobody is subscribed to yet.
        configs.hooks().on_change(configs.snapshot()).await?;
        info!(libraries = configs.len(), "libraries loaded");

        let parent: Arc<dyn ItemsManager<LibraryConfig>> = configs.clone();
        let writable_libraries = FilteredManager::new(parent, |item: &ObjectRef<LibraryConfig>| {
            item.object.is_writable()
        });
        Ok(Self {
            configs,
            writable_libraries,
        })
    }

    /// The configuration entries, in insertion order.
    pub fn configs(&self) -> &Arc<MemoryManager<LibraryConfig, LibraryHooks>> {
        &self.configs
    }

    /// Songs of every enabled library.
    pub fn songs(&self) -> Arc<MergeManager<Song>> {
        self.configs.hooks().songs.clone()
    }

    /// Songs lists of every enabled library.
    pub fn songs_lists(&self) -> Arc<MergeManager<SongsList>> {
        self.configs.hooks().songs_lists.clone()
    }

    /// Songs lists of every enabled, writable library.
    pub fn writable_songs_lists(&self) -> Arc<MergeManager<SongsList>> {
        self.configs.hooks().writable_songs_lists.clone()
    }

    /// Configuration entries of enabled, writable libraries.
    pub fn writable_libraries(&self) -> Arc<FilteredManager<LibraryConfig>> {
        self.writable_libraries.clone()
    }

    pub fn library(&self, id: &str) -> Option<Arc<Library>> {
        self.configs.hooks().library(id)
    }

    pub fn synchronizable_libraries(&self) -> Vec<Arc<Library>> {
        self.configs
            .hooks()
            .synchronizable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn find(&self, id: &str) -> LibraryResult<ObjectRef<LibraryConfig>> {
        self.configs
            .snapshot()
            .into_iter()
            .find(|item| item.object.id == id)
            .ok_or_else(|| LibraryError::LibraryNotFound(id.to_string()))
    }

    pub async fn add_library(&self, config: LibraryConfig) -> LibraryResult<ObjectRef<LibraryConfig>> {
        Ok(self.configs.add(config).await?)
    }

    pub async fn update_library(
        &self,
        config: LibraryConfig,
    ) -> LibraryResult<ObjectRef<LibraryConfig>> {
        let current = self.find(&config.id)?;
        Ok(self.configs.update(&current, config).await?)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> LibraryResult<ObjectRef<LibraryConfig>> {
        let current = self.find(id)?;
        let config = LibraryConfig {
            enabled,
            ..current.object.clone()
        };
        Ok(self.configs.update(&current, config).await?)
    }

    /// Remove a library and erase its local data.
    pub async fn remove_library(&self, id: &str) -> LibraryResult<()> {
        let current = self.find(id)?;
        self.configs.remove(&current).await?;
        Ok(())
    }

    /// Synchronize every synchronizable library, one after the other. A
    /// failing library does not stop the others.
    pub async fn synchronize_all(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for library in self.synchronizable_libraries() {
            let id = library.id();
            match library.synchronize().await {
                Ok(Some(report)) => summary.synchronized.push((id, report)),
                Ok(None) => {}
                Err(e) => {
                    warn!(library = %id, error = %e, "library synchronization failed");
                    summary.failed.push((id, e));
                }
            }
        }
        summary
    }

    /// Release every subscription and close every library store.
    pub async fn dispose(&self) {
        let hooks = self.configs.hooks();
        self.writable_libraries.dispose();
        hooks.songs.dispose();
        hooks.songs_lists.dispose();
        hooks.writable_songs_lists.dispose();
        let libraries: Vec<Arc<Library>> = hooks
            .libraries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for library in libraries {
            library.dispose();
            if let Err(e) = library.close().await {
                warn!(library = %library.id(), error = %e, "failed to close library store");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_source::InMemoryConfigSource;
    use crate::library::MemoryStoreOpener;
    use lectern_items::to_partial_list;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REMOTE: &str = "https://songs.example/shared";

    struct Fixture {
        source: Arc<InMemoryConfigSource>,
        opener: Arc<MemoryStoreOpener>,
        libraries: Libraries,
    }

    async fn fixture() -> Fixture {
        let source = Arc::new(InMemoryConfigSource::new());
        let opener = MemoryStoreOpener::new();
        let libraries = Libraries::load(source.clone(), opener.clone()).await.unwrap();
        Fixture {
            source,
            opener,
            libraries,
        }
    }

    fn writable(id: &str, name: &str) -> LibraryConfig {
        LibraryConfig {
            id: id.into(),
            readonly: false,
            ..LibraryConfig::named(name)
        }
    }

    async fn all<T: lectern_items::Item>(manager: &dyn ItemsManager<T>) -> Vec<ObjectRef<T>> {
        let mut list = to_partial_list(manager.list(Some(1))).await.unwrap();
        while list.has_more() {
            list = list.fetch_more().await.unwrap();
        }
        list.into_items()
    }

    async fn song_titles(libraries: &Libraries) -> Vec<String> {
        all(&*libraries.songs())
            .await
            .into_iter()
            .map(|r| r.object.title)
            .collect()
    }

    async fn import(libraries: &Libraries, id: &str, titles: &[&str]) {
        libraries
            .library(id)
            .unwrap()
            .import_songs(titles.iter().map(|t| Song::new(*t, "")).collect())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn merges_songs_of_enabled_libraries() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        f.libraries.add_library(writable("b", "Beta")).await.unwrap();
        import(&f.libraries, "a", &["Abide", "Come Thou"]).await;
        import(&f.libraries, "b", &["Be Thou", "Doxology"]).await;

        assert_eq!(
            song_titles(&f.libraries).await,
            vec!["Abide", "Be Thou", "Come Thou", "Doxology"]
        );

        f.libraries.set_enabled("b", false).await.unwrap();
        assert_eq!(song_titles(&f.libraries).await, vec!["Abide", "Come Thou"]);
    }

    #[tokio::test]
    async fn configuration_is_saved_and_reloaded() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        f.libraries
            .add_library(LibraryConfig::named("Minted"))
            .await
            .unwrap();

        let saved = f.source.peek(LIBRARIES_KEY).unwrap();
        let saved: Vec<LibraryConfig> = serde_json::from_value(saved).unwrap();
        assert_eq!(saved.len(), 2);
        assert!(!saved[1].id.is_empty());

        let reloaded = Libraries::load(f.source.clone(), f.opener.clone())
            .await
            .unwrap();
        let ids: Vec<String> = reloaded
            .configs()
            .snapshot()
            .into_iter()
            .map(|r| r.object.id)
            .collect();
        assert_eq!(ids[0], "a");
        assert_eq!(ids[1], saved[1].id);
        assert!(reloaded.library("a").is_some());
    }

    #[tokio::test]
    async fn load_validates_stored_entries() {
        let source = Arc::new(InMemoryConfigSource::with_value(
            LIBRARIES_KEY,
            serde_json::json!([{ "displayName": "Old", "localEnabled": false }]),
        ));
        let libraries = Libraries::load(source.clone(), MemoryStoreOpener::new())
            .await
            .unwrap();
        let config = libraries.configs().snapshot()[0].object.clone();
        assert!(!config.id.is_empty());
        assert!(!config.enabled);
        let saved: Vec<LibraryConfig> =
            serde_json::from_value(source.peek(LIBRARIES_KEY).unwrap()).unwrap();
        assert_eq!(saved[0].id, config.id);
    }

    #[tokio::test]
    async fn writable_views_skip_readonly_libraries() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        f.libraries
            .add_library(LibraryConfig {
                id: "ro".into(),
                ..LibraryConfig::named("Read only")
            })
            .await
            .unwrap();

        assert_eq!(f.libraries.songs_lists().managers().len(), 2);
        assert_eq!(f.libraries.writable_songs_lists().managers().len(), 1);
        let writable_ids: Vec<String> = all(&*f.libraries.writable_libraries())
            .await
            .into_iter()
            .map(|r| r.object.id)
            .collect();
        assert_eq!(writable_ids, vec!["a"]);
    }

    #[tokio::test]
    async fn merged_views_notify_on_library_changes() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        let songs = f.libraries.songs();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = songs.changes().subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        import(&f.libraries, "a", &["Abide", "Be Thou"]).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removing_a_library_destroys_its_data() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        import(&f.libraries, "a", &["Abide"]).await;
        assert!(f.opener.local("a").is_some());

        f.libraries.remove_library("a").await.unwrap();
        assert!(f.opener.local("a").is_none());
        assert!(f.libraries.library("a").is_none());
        assert!(song_titles(&f.libraries).await.is_empty());
        assert!(matches!(
            f.libraries.remove_library("a").await,
            Err(LibraryError::LibraryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        let err = f.libraries.add_library(writable("a", "Again")).await.unwrap_err();
        assert!(matches!(err, LibraryError::Items(ItemsError::Conflict { .. })));
        assert_eq!(f.libraries.configs().len(), 1);
    }

    #[tokio::test]
    async fn synchronize_all_collects_failures() {
        let f = fixture().await;
        f.libraries
            .add_library(LibraryConfig {
                remote_url: REMOTE.into(),
                ..writable("up", "Reachable")
            })
            .await
            .unwrap();
        f.libraries
            .add_library(LibraryConfig {
                remote_url: "https://songs.example/down".into(),
                ..writable("down", "Unreachable")
            })
            .await
            .unwrap();
        f.libraries.add_library(writable("solo", "Local only")).await.unwrap();
        f.opener.set_reachable("https://songs.example/down", false);
        import(&f.libraries, "up", &["Abide"]).await;

        assert_eq!(f.libraries.synchronizable_libraries().len(), 2);
        let summary = f.libraries.synchronize_all().await;
        assert!(!summary.is_success());
        assert_eq!(summary.synchronized.len(), 1);
        assert_eq!(summary.synchronized[0].0, "up");
        assert_eq!(summary.failed[0].0, "down");
        assert_eq!(f.opener.remote(REMOTE).len(), 1);
    }

    #[tokio::test]
    async fn update_keeps_the_library_id() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        let current = f.libraries.configs().snapshot()[0].clone();
        let renamed = f
            .libraries
            .configs()
            .update(
                &current,
                LibraryConfig {
                    id: "other".into(),
                    ..writable("a", "Renamed")
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.object.id, "a");
        assert_eq!(f.libraries.library("a").unwrap().config().display_name, "Renamed");
    }

    #[tokio::test]
    async fn dispose_releases_library_subscriptions() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        let library = f.libraries.library("a").unwrap();
        assert_eq!(library.songs().changes().subscriber_count(), 1);
        f.libraries.dispose().await;
        assert_eq!(library.songs().changes().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn poisoned_library_table_fails_writes_but_keeps_reads() {
        let f = fixture().await;
        f.libraries.add_library(writable("a", "Alpha")).await.unwrap();
        let hooks = f.libraries.configs().hooks();
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = hooks.libraries.write().unwrap();
                    panic!("writer failed while holding the library table");
                })
                .join();
        });

        let err = f.libraries.add_library(writable("b", "Beta")).await.unwrap_err();
        assert!(matches!(
            err,
            LibraryError::Items(ItemsError::BackingUnavailable(_))
        ));
        let err = f.libraries.remove_library("a").await.unwrap_err();
        assert!(matches!(
            err,
            LibraryError::Items(ItemsError::BackingUnavailable(_))
        ));
        assert!(f.libraries.library("a").is_some());
    }
}
