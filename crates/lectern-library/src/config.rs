use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Persisted configuration of one library.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryConfig {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    #[serde(rename = "remoteURL")]
    pub remote_url: String,
    pub remote_enabled: bool,
    pub local_enabled: bool,
    pub readonly: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: String::new(),
            enabled: true,
            remote_url: String::new(),
            remote_enabled: true,
            local_enabled: true,
            readonly: true,
        }
    }
}

impl LibraryConfig {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Normalize a configuration: mint a missing id, disable the remote when
    /// there is no URL, and disable a library left with no backing.
    pub fn validate(mut self) -> Self {
        if self.id.is_empty() {
            self.id = uuid::Uuid::now_v7().to_string();
        }
        if self.remote_url.is_empty() {
            self.remote_enabled = false;
        }
        if !self.local_enabled && !self.remote_enabled {
            self.enabled = false;
        }
        self
    }

    /// Enabled with a local copy.
    pub fn has_local(&self) -> bool {
        self.enabled && self.local_enabled
    }

    /// Enabled and served directly from the remote.
    pub fn is_remote(&self) -> bool {
        !self.has_local() && self.enabled && self.remote_enabled
    }

    /// URL of the remote in use, if any.
    pub fn active_remote(&self) -> Option<&str> {
        (self.enabled && self.remote_enabled).then_some(self.remote_url.as_str())
    }

    /// A local copy that can be synchronized with a remote.
    pub fn is_synchronizable(&self) -> bool {
        self.enabled && self.remote_enabled && self.local_enabled
    }

    pub fn is_writable(&self) -> bool {
        self.enabled && !self.readonly
    }

    /// Whether moving from `self` to `next` changes which store backs the
    /// library, so an open store must be closed.
    pub fn backing_changed(&self, next: &LibraryConfig) -> bool {
        self.has_local() != next.has_local()
            || self.is_remote() != next.is_remote()
            || (self.is_remote() && next.is_remote() && self.active_remote() != next.active_remote())
    }
}

/// Enabled libraries first, then by case-insensitive display name.
pub fn library_order(a: &LibraryConfig, b: &LibraryConfig) -> Ordering {
    b.enabled.cmp(&a.enabled).then_with(|| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
    })
}
