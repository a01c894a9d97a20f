use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Operator settings, read from a toml file when one exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Page size of song listings.
    pub page_size: usize,
    /// Page size of search results.
    pub search_page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".lectern"),
            page_size: 40,
            search_page_size: 20,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing settings in {}", path.display()))
    }

    pub fn libraries_file(&self) -> PathBuf {
        self.data_dir.join("libraries.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/lectern.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lectern.toml");
        std::fs::write(&path, "page_size = 10\ndata_dir = \"/srv/lectern\"\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.search_page_size, 20);
        assert_eq!(settings.libraries_file(), PathBuf::from("/srv/lectern/libraries.json"));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lectern.toml");
        std::fs::write(&path, "page_size = \"many\"").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
