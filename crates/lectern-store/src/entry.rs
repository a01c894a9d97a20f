use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lectern_types::{DocId, Revision};

/// Where a store's data lives.
///
/// Search indices are only ever built on local data, so managers consult
/// this on every call to decide whether search is offered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreAdapter {
    Local,
    Remote,
}

/// One stored version of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub id: DocId,
    /// Revision this write replaces on `put`, or the stored revision on reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
    pub kind: String,
    #[serde(default)]
    pub object: Value,
    /// Derived, denormalized fields (e.g. extracted lyrics) used by search.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl PersistedEntry {
    pub fn new(id: DocId, kind: impl Into<String>, object: Value) -> Self {
        Self {
            id,
            revision: None,
            kind: kind.into(),
            object,
            fields: BTreeMap::new(),
            deleted: false,
        }
    }

    /// A soft-delete marker replacing `revision` of `id`.
    pub fn tombstone(id: DocId, kind: impl Into<String>, revision: Revision) -> Self {
        Self {
            id,
            revision: Some(revision),
            kind: kind.into(),
            object: Value::Null,
            fields: BTreeMap::new(),
            deleted: true,
        }
    }

    pub fn with_revision(mut self, revision: Option<Revision>) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Bytes the revision hash is derived from.
    pub(crate) fn revision_content(&self) -> Vec<u8> {
        serde_json::to_vec(&(&self.kind, &self.object, &self.fields, self.deleted))
            .unwrap_or_default()
    }

    /// All string values reachable at a dotted `path`.
    ///
    /// Paths starting with `object.` walk into the JSON body (arrays are
    /// traversed element-wise); any other path names a derived field.
    pub fn field_values(&self, path: &str) -> Vec<String> {
        match path.strip_prefix("object.") {
            Some(rest) => {
                let mut out = Vec::new();
                collect_strings(&self.object, rest.split('.').collect::<Vec<_>>().as_slice(), &mut out);
                out
            }
            None if path == "object" => {
                let mut out = Vec::new();
                collect_strings(&self.object, &[], &mut out);
                out
            }
            None => self.fields.get(path).cloned().into_iter().collect(),
        }
    }
}

fn collect_strings(value: &Value, path: &[&str], out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_strings(item, path, out);
            }
        }
        Value::Object(map) => {
            if let Some((head, rest)) = path.split_first() {
                if let Some(child) = map.get(*head) {
                    collect_strings(child, rest, out);
                }
            }
        }
        Value::String(s) if path.is_empty() => out.push(s.clone()),
        _ => {}
    }
}

/// Outcome of a successful `put`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutResult {
    pub id: DocId,
    pub revision: Revision,
}

/// Inclusive id range scan, paginated by cursor.
#[derive(Clone, Debug)]
pub struct RangeQuery {
    pub start: String,
    pub end: String,
    pub limit: usize,
    /// Last id of the previous page; the scan resumes strictly after it.
    pub cursor: Option<DocId>,
}

impl RangeQuery {
    pub fn new(start: impl Into<String>, end: impl Into<String>, limit: usize) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            limit,
            cursor: None,
        }
    }

    /// Scan over every id of `kind`.
    pub fn kind(kind: &str, limit: usize) -> Self {
        let (start, end) = DocId::kind_range(kind);
        Self::new(start, end, limit)
    }

    pub fn after(mut self, cursor: Option<DocId>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of a range scan.
#[derive(Clone, Debug, Default)]
pub struct RangePage {
    pub entries: Vec<PersistedEntry>,
    /// Present iff the page was full, i.e. more entries may follow.
    pub next_cursor: Option<DocId>,
}

/// Full-text query over the entries of one kind.
#[derive(Clone, Debug)]
pub struct SearchQuery {
    pub text: String,
    pub kind: String,
    /// Dotted field paths to search (see [`PersistedEntry::field_values`]).
    pub fields: Vec<String>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(kind: impl Into<String>, fields: &[&str], text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: kind.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A search result, most relevant first.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub entry: PersistedEntry,
    pub score: f64,
}

/// Incremental change feed request.
#[derive(Clone, Copy, Debug)]
pub struct ChangesQuery {
    pub since: u64,
    pub limit: usize,
}

/// One batch of the change feed, tombstones included.
#[derive(Clone, Debug, Default)]
pub struct ChangesPage {
    pub entries: Vec<PersistedEntry>,
    pub last_seq: u64,
}
