//! Key/value persistence for library configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{LibraryError, LibraryResult};

/// Where configuration values are loaded from and saved to.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get(&self, key: &str) -> LibraryResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> LibraryResult<()>;
}

/// Configuration held in memory only.
#[derive(Debug, Default)]
pub struct InMemoryConfigSource {
    values: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: impl Into<String>, value: Value) -> Self {
        let source = Self::new();
        source
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
        source
    }

    /// Synchronous read, for inspection.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }
}

#[async_trait]
impl ConfigSource for InMemoryConfigSource {
    async fn get(&self, key: &str) -> LibraryResult<Option<Value>> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: Value) -> LibraryResult<()> {
        self.values
            .write()
            .map_err(|_| LibraryError::Config("configuration lock poisoned".into()))?
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Configuration kept in one JSON object file, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileConfigSource {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileConfigSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> LibraryResult<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ConfigSource for JsonFileConfigSource {
    async fn get(&self, key: &str) -> LibraryResult<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> LibraryResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LibraryError::Config(format!("{} write lock poisoned", self.path.display())))?;
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), key, "configuration saved");
        Ok(())
    }
}
