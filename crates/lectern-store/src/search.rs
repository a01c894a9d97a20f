//! Inverted full-text index over the entries of one kind.
//!
//! Tokens are lowercased and stripped of diacritics. A query matches a
//! document when every query token matches one of its tokens, either exactly
//! or as a prefix; exact matches weigh twice as much as prefix matches, and
//! rarer tokens weigh more than common ones.

use std::collections::{BTreeMap, HashMap};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::entry::PersistedEntry;

/// Lowercase `text` and remove its diacritics ("Éléonore" -> "eleonore").
pub fn normalize_text(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split normalized text into index tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

const EXACT_WEIGHT: f64 = 1.0;
const PREFIX_WEIGHT: f64 = 0.5;

#[derive(Debug)]
pub struct SearchIndex {
    kind: String,
    fields: Vec<String>,
    /// token -> document id -> term frequency
    postings: BTreeMap<String, HashMap<String, f64>>,
    /// document id -> distinct tokens, for removal
    doc_tokens: HashMap<String, Vec<String>>,
}

impl SearchIndex {
    pub fn new(kind: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            fields,
            postings: BTreeMap::new(),
            doc_tokens: HashMap::new(),
        }
    }

    /// Whether this index serves queries for `kind` over `fields`.
    pub fn serves(&self, kind: &str, fields: &[String]) -> bool {
        self.kind == kind && self.fields == fields
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.doc_tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_tokens.is_empty()
    }

    /// Index the current version of `entry`, replacing any previous one.
    /// Tombstones and entries of other kinds are only removed.
    pub fn upsert(&mut self, entry: &PersistedEntry) {
        let id = entry.id.as_str();
        self.remove(id);
        if entry.deleted || entry.kind != self.kind {
            return;
        }
        let mut frequencies: HashMap<String, f64> = HashMap::new();
        for field in &self.fields {
            for value in entry.field_values(field) {
                for token in tokenize(&value) {
                    *frequencies.entry(token).or_default() += 1.0;
                }
            }
        }
        let mut tokens = Vec::with_capacity(frequencies.len());
        for (token, tf) in frequencies {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(id.to_string(), tf);
            tokens.push(token);
        }
        self.doc_tokens.insert(id.to_string(), tokens);
    }

    pub fn remove(&mut self, id: &str) {
        let Some(tokens) = self.doc_tokens.remove(id) else {
            return;
        };
        for token in tokens {
            if let Some(docs) = self.postings.get_mut(&token) {
                docs.remove(id);
                if docs.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    /// Matching document ids with their scores, best first; ties by id.
    pub fn query(&self, text: &str) -> Vec<(String, f64)> {
        let query_tokens = tokenize(text);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let total_docs = self.doc_tokens.len() as f64;
        let mut scores: HashMap<&str, (f64, usize)> = HashMap::new();

        for query_token in &query_tokens {
            let mut per_doc: HashMap<&str, f64> = HashMap::new();
            for (token, docs) in self.postings.range(query_token.clone()..) {
                if !token.starts_with(query_token.as_str()) {
                    break;
                }
                let weight = if token == query_token {
                    EXACT_WEIGHT
                } else {
                    PREFIX_WEIGHT
                };
                let idf = (1.0 + total_docs / docs.len() as f64).ln();
                for (doc, tf) in docs {
                    *per_doc.entry(doc.as_str()).or_default() += weight * tf * idf;
                }
            }
            for (doc, score) in per_doc {
                let slot = scores.entry(doc).or_default();
                slot.0 += score;
                slot.1 += 1;
            }
        }

        let needed = query_tokens.len();
        let mut hits: Vec<(String, f64)> = scores
            .into_iter()
            .filter(|(_, (_, matched))| *matched == needed)
            .map(|(doc, (score, _))| (doc.to_string(), score / needed as f64))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_types::DocId;
    use serde_json::json;

    fn song(suffix: &str, title: &str, lyrics: &str) -> PersistedEntry {
        PersistedEntry::new(
            DocId::new("song", &normalize_text(title), suffix),
            "song",
            json!({ "title": title }),
        )
        .with_field("lyrics", lyrics)
    }

    fn index() -> SearchIndex {
        SearchIndex::new("song", vec!["object.title".into(), "lyrics".into()])
    }

    #[test]
    fn normalize_strips_diacritics_and_case() {
        assert_eq!(normalize_text("Éléonore À Noël"), "eleonore a noel");
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("Hello, world! (again)"), vec!["hello", "world", "again"]);
    }

    #[test]
    fn query_requires_every_token() {
        let mut idx = index();
        idx.upsert(&song("1", "Amazing Grace", "how sweet the sound"));
        idx.upsert(&song("2", "Sweet Hour", "of prayer"));
        let hits = idx.query("sweet sound");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].0.ends_with('1'));
    }

    #[test]
    fn exact_match_beats_prefix_match() {
        let mut idx = index();
        idx.upsert(&song("1", "Grace", ""));
        idx.upsert(&song("2", "Graceful", ""));
        let hits = idx.query("grace");
        assert_eq!(hits.len(), 2);
        assert!(hits[0].0.ends_with('1'));
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn query_ignores_diacritics() {
        let mut idx = index();
        idx.upsert(&song("1", "Noël nouvelet", ""));
        assert_eq!(idx.query("noel").len(), 1);
    }

    #[test]
    fn upsert_replaces_previous_tokens() {
        let mut idx = index();
        idx.upsert(&song("1", "Old title", ""));
        let mut renamed = song("1", "New title", "");
        renamed.id = DocId::new("song", "old title", "1");
        idx.upsert(&renamed);
        assert!(idx.query("old").is_empty());
        assert_eq!(idx.query("new").len(), 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn tombstones_and_other_kinds_are_not_indexed() {
        let mut idx = index();
        let entry = song("1", "Grace", "");
        idx.upsert(&entry);
        let mut tomb = entry.clone();
        tomb.deleted = true;
        idx.upsert(&tomb);
        assert!(idx.is_empty());

        let mut list = song("2", "Grace", "");
        list.kind = "songslist".into();
        idx.upsert(&list);
        assert!(idx.is_empty());
    }

    #[test]
    fn empty_query_matches_nothing() {
        let mut idx = index();
        idx.upsert(&song("1", "Grace", ""));
        assert!(idx.query("  ,, ").is_empty());
    }
}
