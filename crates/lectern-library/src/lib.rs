//! Song libraries for Lectern.
//!
//! A [`Library`] is one configured source of songs and songs lists, backed
//! by a local store, a remote store, or a local copy synchronized with a
//! remote. [`Libraries`] holds every configured library and exposes merged,
//! sorted views across the enabled ones:
//!
//! ```text
//! Libraries
//!   configs              MemoryManager<LibraryConfig>  (saved to a ConfigSource)
//!   songs                MergeManager<Song>            (enabled libraries)
//!   songs_lists          MergeManager<SongsList>       (enabled libraries)
//!   writable_songs_lists MergeManager<SongsList>       (enabled, writable)
//! ```
//!
//! The songs inside one list are edited through a [`SongsListSongsManager`],
//! which writes the list back after every change.

pub mod config;
pub mod config_source;
pub mod error;
pub mod libraries;
pub mod library;
pub mod models;
pub mod songs_list;

pub use config::{library_order, LibraryConfig};
pub use config_source::{ConfigSource, InMemoryConfigSource, JsonFileConfigSource};
pub use error::{LibraryError, LibraryResult};
pub use libraries::{Libraries, LibraryHooks, SyncSummary, LIBRARIES_KEY};
pub use library::{FileStoreOpener, Library, LibraryBacking, MemoryStoreOpener, StoreOpener};
pub use models::{extract_lyrics, Song, SongCodec, SongsList, SongsListCodec, SONGS_LIST_KIND, SONG_KIND};
pub use songs_list::{open_songs_list, SongsListHooks, SongsListSongsManager};
