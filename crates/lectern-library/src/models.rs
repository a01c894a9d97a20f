//! Song and songs-list objects and how they are stored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lectern_items::EntryCodec;
use lectern_store::normalize_text;

/// Kind tag of stored songs.
pub const SONG_KIND: &str = "song";
/// Kind tag of stored songs lists.
pub const SONGS_LIST_KIND: &str = "songslist";

/// A song: title, authors, and its music text with inline `[chord]` marks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub music: String,
}

impl Song {
    pub fn new(title: impl Into<String>, music: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            authors: Vec::new(),
            music: music.into(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// The music text without chord marks.
    pub fn lyrics(&self) -> String {
        extract_lyrics(&self.music)
    }
}

/// Drop `[...]` chord marks and collapse the spaces they leave behind.
pub fn extract_lyrics(music: &str) -> String {
    let mut out = String::with_capacity(music.len());
    let mut in_chord = false;
    for c in music.chars() {
        match c {
            '[' => in_chord = true,
            ']' if in_chord => in_chord = false,
            _ if in_chord => {}
            _ => out.push(c),
        }
    }
    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A named, ordered selection of songs. Songs are embedded by value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongsList {
    pub title: String,
    #[serde(default)]
    pub songs: Vec<Song>,
}

impl SongsList {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            songs: Vec::new(),
        }
    }
}

/// Songs: content-addressed, searchable by title, lyrics and authors.
#[derive(Clone, Copy, Debug, Default)]
pub struct SongCodec;

impl EntryCodec<Song> for SongCodec {
    fn kind(&self) -> &str {
        SONG_KIND
    }

    fn sort_key(&self, object: &Song) -> String {
        normalize_text(&object.title)
    }

    fn derived_fields(&self, object: &Song) -> BTreeMap<String, String> {
        BTreeMap::from([("lyrics".to_string(), object.lyrics())])
    }

    fn content_addressed(&self) -> bool {
        true
    }

    fn search_fields(&self) -> &[&'static str] {
        &["object.title", "lyrics", "object.authors"]
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SongsListCodec;

impl EntryCodec<SongsList> for SongsListCodec {
    fn kind(&self) -> &str {
        SONGS_LIST_KIND
    }

    fn sort_key(&self, object: &SongsList) -> String {
        normalize_text(&object.title)
    }
}
