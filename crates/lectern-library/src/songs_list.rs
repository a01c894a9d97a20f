//! Editing the songs inside one songs list.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use lectern_items::{ItemsError, ItemsResult, MemoryHooks, MemoryManager, ObjectRef};

use crate::models::{Song, SongsList};

/// Keeps a songs list in step with the in-memory list of its songs.
pub struct SongsListHooks {
    list: Mutex<ObjectRef<SongsList>>,
}

impl SongsListHooks {
    pub fn new(list: ObjectRef<SongsList>) -> Self {
        Self {
            list: Mutex::new(list),
        }
    }

    /// Ref to the latest stored version of the list.
    pub fn current_list(&self) -> ObjectRef<SongsList> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl MemoryHooks<Song> for SongsListHooks {
    fn readonly(&self) -> bool {
        self.current_list()
            .manager()
            .map_or(true, |manager| manager.readonly())
    }

    async fn on_change(&self, items: Vec<ObjectRef<Song>>) -> ItemsResult<()> {
        let current = self.current_list();
        let manager = current.manager().ok_or_else(|| {
            ItemsError::StaleReference("songs list manager was dropped".to_string())
        })?;
        let list = SongsList {
            title: current.object.title.clone(),
            songs: items.into_iter().map(|r| r.object).collect(),
        };
        let count = list.songs.len();
        let updated = manager.update(&current, list).await?;
        debug!(list = %updated.object.title, count, "songs list saved");
        *self
            .list
            .lock()
            .map_err(|_| ItemsError::BackingUnavailable("songs list lock poisoned".into()))? = updated;
        Ok(())
    }
}

/// The songs of one songs list. Every change is written back to the list.
pub type SongsListSongsManager = MemoryManager<Song, SongsListHooks>;

/// Open the songs of `list` for editing.
pub async fn open_songs_list(list: ObjectRef<SongsList>) -> ItemsResult<Arc<SongsListSongsManager>> {
    let songs = list.object.songs.clone();
    let manager = MemoryManager::with_hooks(SongsListHooks::new(list));
    manager.internal_add_all(songs).await?;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SongsListCodec;
    use lectern_items::{to_partial_list, DocumentStoreManager, FixedStore, ItemsManager};
    use lectern_store::InMemoryDocumentStore;

    fn lists() -> (
        Arc<FixedStore>,
        Arc<DocumentStoreManager<SongsList, SongsListCodec>>,
    ) {
        let handle = FixedStore::new(Arc::new(InMemoryDocumentStore::new("lists")));
        let manager = DocumentStoreManager::new(SongsListCodec, handle.clone());
        (handle, manager)
    }

    fn sunday() -> SongsList {
        SongsList {
            title: "Sunday".into(),
            songs: vec![Song::new("Abide", ""), Song::new("Be Thou", "")],
        }
    }

    async fn stored_titles(manager: &dyn ItemsManager<SongsList>) -> Vec<String> {
        let list = to_partial_list(manager.list(None)).await.unwrap();
        list.items()[0]
            .object
            .songs
            .iter()
            .map(|s| s.title.clone())
            .collect()
    }

    #[tokio::test]
    async fn loads_songs_without_writing_back() {
        let (_, manager) = lists();
        let list = manager.add(sunday()).await.unwrap();
        let songs = open_songs_list(list.clone()).await.unwrap();
        assert_eq!(songs.len(), 2);
        assert!(songs.hooks().current_list().same_ref(&list));
    }

    #[tokio::test]
    async fn changes_are_written_to_the_list() {
        let (_, manager) = lists();
        let list = manager.add(sunday()).await.unwrap();
        let songs = open_songs_list(list.clone()).await.unwrap();

        songs.add(Song::new("Come Thou Fount", "")).await.unwrap();
        let first = songs.snapshot()[0].clone();
        songs.remove(&first).await.unwrap();

        assert_eq!(
            stored_titles(&*manager).await,
            vec!["Be Thou", "Come Thou Fount"]
        );
        let current = songs.hooks().current_list();
        assert!(!current.same_ref(&list));
        assert_eq!(current.object.songs.len(), 2);
        assert!(manager.update(&list, sunday()).await.is_err());
    }

    #[tokio::test]
    async fn follows_the_list_manager_readonly_state() {
        let (handle, manager) = lists();
        let list = manager.add(sunday()).await.unwrap();
        let songs = open_songs_list(list).await.unwrap();
        assert!(!songs.readonly());

        handle.set_readonly(true);
        assert!(songs.readonly());
        assert!(songs.add(Song::new("X", "")).await.unwrap_err().is_read_only());
    }

    #[tokio::test]
    async fn dropped_list_manager_makes_songs_read_only() {
        let (_, manager) = lists();
        let list = manager.add(sunday()).await.unwrap();
        let songs = open_songs_list(list).await.unwrap();
        drop(manager);
        assert!(songs.readonly());
    }
}
