use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// Sort key attached to every object ref and used exclusively to merge and
/// sort streams coming from different managers.
///
/// Keys need not be unique. The order is total: every number sorts before
/// every text key, numbers compare with [`f64::total_cmp`] and text compares
/// bytewise.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderKey {
    Number(f64),
    Text(String),
}

impl OrderKey {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn number(value: f64) -> Self {
        Self::Number(value)
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => f.write_str(&t.replace('\u{1}', "/")),
        }
    }
}

impl From<&str> for OrderKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OrderKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for OrderKey {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an items manager.
///
/// Managers are compared by this id, never by value, when a composition
/// diffs its set of children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId(u64);

impl ManagerId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_MANAGER_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mgr#{}", self.0)
    }
}
