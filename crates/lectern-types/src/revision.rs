use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ContentHash;

/// Optimistic-concurrency token attached to every stored document version.
///
/// Textual form is `"{generation}-{hash}"`. The generation increases by one on
/// every write of the same id; the hash is derived from the written content
/// and the parent revision. Ordering is by generation, then hash, which gives
/// replicas a deterministic winner when two of them wrote the same generation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    /// Revision of the first write of a document.
    pub fn first(content: &[u8]) -> Self {
        Self::derive(1, None, content)
    }

    /// Revision following `self` for the given content.
    pub fn next(&self, content: &[u8]) -> Self {
        Self::derive(self.generation + 1, Some(self), content)
    }

    fn derive(generation: u64, parent: Option<&Revision>, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"lectern-revision-v1:");
        if let Some(parent) = parent {
            hasher.update(parent.to_string().as_bytes());
        }
        hasher.update(b":");
        hasher.update(content);
        let hash = ContentHash::from_hash(*hasher.finalize().as_bytes());
        Self {
            generation,
            hash: hash.to_hex()[..16].to_string(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({self})")
    }
}

impl FromStr for Revision {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| TypeError::InvalidRevision(s.to_string()))?;
        let generation = generation
            .parse::<u64>()
            .map_err(|_| TypeError::InvalidRevision(s.to_string()))?;
        if generation == 0 || hash.is_empty() {
            return Err(TypeError::InvalidRevision(s.to_string()));
        }
        Ok(Self {
            generation,
            hash: hash.to_string(),
        })
    }
}

impl Serialize for Revision {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Revision {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
