use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Separator between the three parts of a [`DocId`].
pub const KEY_SEPARATOR: char = '\u{1}';

/// Upper bound appended to a prefix to close a range scan over it.
///
/// `char::MAX` sorts after every UTF-8 encoded character that can follow the
/// prefix, so `[prefix, prefix + RANGE_END]` covers all ids sharing it.
pub const RANGE_END: char = char::MAX;

/// Identifier of a persisted document: `kind \x01 sortKey \x01 suffix`.
///
/// All kinds share one keyspace. Putting the kind first lets a range scan
/// select one kind; putting the normalized sort key second makes that scan
/// come back in human-sortable order. The suffix disambiguates entries that
/// share a sort key; for content-addressed kinds it is a content hash, so the
/// whole id is a function of the content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Build an id from its parts. Separator characters inside `sort_key`
    /// are replaced by spaces so the id always has exactly three parts.
    pub fn new(kind: &str, sort_key: &str, suffix: &str) -> Self {
        let sort_key: String = sort_key
            .chars()
            .map(|c| if c == KEY_SEPARATOR { ' ' } else { c })
            .collect();
        Self(format!(
            "{}{sep}{}{sep}{}",
            kind,
            sort_key,
            suffix,
            sep = KEY_SEPARATOR
        ))
    }

    /// Parse an id produced by [`DocId::new`].
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        if raw.split(KEY_SEPARATOR).count() != 3 {
            return Err(TypeError::InvalidDocId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// The prefix shared by every id of `kind` whose sort key is `sort_key`.
    pub fn prefix(kind: &str, sort_key: &str) -> String {
        let probe = Self::new(kind, sort_key, "");
        probe.0
    }

    /// Range `[start, end]` covering every id of `kind`.
    pub fn kind_range(kind: &str) -> (String, String) {
        let start = format!("{kind}{KEY_SEPARATOR}");
        let end = format!("{start}{RANGE_END}");
        (start, end)
    }

    /// The kind part.
    pub fn kind(&self) -> &str {
        self.part(0)
    }

    /// The normalized sort key part.
    pub fn sort_key(&self) -> &str {
        self.part(1)
    }

    /// The unique suffix part.
    pub fn suffix(&self) -> &str {
        self.part(2)
    }

    /// Whether this id starts with `kind \x01 sort_key \x01`.
    pub fn has_prefix(&self, kind: &str, sort_key: &str) -> bool {
        self.0.starts_with(&Self::prefix(kind, sort_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn part(&self, index: usize) -> &str {
        self.0.split(KEY_SEPARATOR).nth(index).unwrap_or("")
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({}/{}/{})", self.kind(), self.sort_key(), self.suffix())
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
