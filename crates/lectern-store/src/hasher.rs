use lectern_types::ContentHash;

use crate::error::StoreResult;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so identical bytes hashed for different purposes never
/// collide.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for content-addressed document suffixes.
    pub const ENTRY: Self = Self {
        domain: "lectern-entry-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    ///
    /// `serde_json` writes struct fields in declaration order and maps from
    /// `serde_json::Value` in key order, so equal values hash equally.
    pub fn hash_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> StoreResult<ContentHash> {
        let data = serde_json::to_vec(value)?;
        Ok(self.hash(&data))
    }

    /// Hash `value` under an additional `kind` qualifier.
    pub fn hash_kind_json<T: serde::Serialize + ?Sized>(
        &self,
        kind: &str,
        value: &T,
    ) -> StoreResult<ContentHash> {
        let mut data = kind.as_bytes().to_vec();
        data.push(b':');
        serde_json::to_writer(&mut data, value)?;
        Ok(self.hash(&data))
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
