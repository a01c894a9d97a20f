//! Change-feed replication between two document stores.
//!
//! Replication reads the source's change feed in batches and offers every
//! version to the target with [`DocumentStore::put_replica`]. Because each
//! store keeps the highest revision of every id, replicating in both
//! directions leaves both stores holding the same winner.

use tracing::{debug, info};

use crate::entry::ChangesQuery;
use crate::error::StoreResult;
use crate::traits::DocumentStore;

/// Entries pulled from the change feed per round trip.
pub const BATCH_SIZE: usize = 100;

/// Summary of one replication pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Versions read from the source's change feed.
    pub docs_read: usize,
    /// Versions the target kept.
    pub docs_written: usize,
    /// Source sequence reached; pass it as `since` to resume.
    pub last_seq: u64,
}

impl ReplicationReport {
    fn absorb(&mut self, other: ReplicationReport) {
        self.docs_read += other.docs_read;
        self.docs_written += other.docs_written;
    }
}

/// One-way replication of every change in `source` after `since` into `target`.
pub async fn replicate(
    source: &dyn DocumentStore,
    target: &dyn DocumentStore,
    since: u64,
) -> StoreResult<ReplicationReport> {
    let mut report = ReplicationReport {
        last_seq: since,
        ..Default::default()
    };
    loop {
        let page = source
            .changes(ChangesQuery {
                since: report.last_seq,
                limit: BATCH_SIZE,
            })
            .await?;
        if page.entries.is_empty() {
            break;
        }
        let batch = page.entries.len();
        for entry in page.entries {
            report.docs_read += 1;
            if target.put_replica(entry).await? {
                report.docs_written += 1;
            }
        }
        report.last_seq = page.last_seq;
        debug!(batch, last_seq = report.last_seq, "replicated batch");
        if batch < BATCH_SIZE {
            break;
        }
    }
    info!(
        read = report.docs_read,
        written = report.docs_written,
        "replication finished"
    );
    Ok(report)
}

/// Two-way replication: `a` into `b`, then `b` into `a`.
///
/// The returned report sums both directions; its `last_seq` is the one
/// reached on `b`.
pub async fn sync(a: &dyn DocumentStore, b: &dyn DocumentStore) -> StoreResult<ReplicationReport> {
    let mut report = replicate(a, b, 0).await?;
    let back = replicate(b, a, 0).await?;
    report.absorb(back);
    report.last_seq = back.last_seq;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PersistedEntry;
    use crate::memory::InMemoryDocumentStore;
    use lectern_types::DocId;
    use serde_json::json;

    fn song(key: &str) -> PersistedEntry {
        PersistedEntry::new(DocId::new("song", key, "1"), "song", json!({ "title": key }))
    }

    #[tokio::test]
    async fn replicate_copies_live_documents_and_tombstones() {
        let source = InMemoryDocumentStore::new("source");
        let target = InMemoryDocumentStore::remote("target");
        let a = source.put(song("a")).await.unwrap();
        source.put(song("b")).await.unwrap();
        source
            .put(PersistedEntry::tombstone(a.id.clone(), "song", a.revision))
            .await
            .unwrap();

        let report = replicate(&source, &target, 0).await.unwrap();
        assert_eq!(report.docs_read, 2);
        assert_eq!(report.docs_written, 2);
        assert_eq!(target.len(), 1);
        assert!(target.raw(&a.id).unwrap().deleted);
    }

    #[tokio::test]
    async fn replicate_is_idempotent() {
        let source = InMemoryDocumentStore::new("source");
        let target = InMemoryDocumentStore::new("target");
        source.put(song("a")).await.unwrap();
        replicate(&source, &target, 0).await.unwrap();
        let again = replicate(&source, &target, 0).await.unwrap();
        assert_eq!(again.docs_read, 1);
        assert_eq!(again.docs_written, 0);
    }

    #[tokio::test]
    async fn replicate_resumes_from_sequence() {
        let source = InMemoryDocumentStore::new("source");
        let target = InMemoryDocumentStore::new("target");
        source.put(song("a")).await.unwrap();
        let first = replicate(&source, &target, 0).await.unwrap();
        source.put(song("b")).await.unwrap();
        let second = replicate(&source, &target, first.last_seq).await.unwrap();
        assert_eq!(second.docs_read, 1);
        assert_eq!(target.len(), 2);
    }

    #[tokio::test]
    async fn replicate_spans_multiple_batches() {
        let source = InMemoryDocumentStore::new("source");
        let target = InMemoryDocumentStore::new("target");
        for i in 0..(BATCH_SIZE + 5) {
            source.put(song(&format!("s{i:04}"))).await.unwrap();
        }
        let report = replicate(&source, &target, 0).await.unwrap();
        assert_eq!(report.docs_written, BATCH_SIZE + 5);
        assert_eq!(target.len(), BATCH_SIZE + 5);
    }

    #[tokio::test]
    async fn sync_converges_on_concurrent_edits() {
        let a = InMemoryDocumentStore::new("a");
        let b = InMemoryDocumentStore::new("b");
        let base = a.put(song("x")).await.unwrap();
        replicate(&a, &b, 0).await.unwrap();

        let edit = |title: &str| {
            let mut e = song("x").with_revision(Some(base.revision.clone()));
            e.object = json!({ "title": title });
            e
        };
        a.put(edit("from a")).await.unwrap();
        b.put(edit("from b")).await.unwrap();
        b.put(song("y")).await.unwrap();

        sync(&a, &b).await.unwrap();
        let on_a = a.get(&base.id).await.unwrap();
        let on_b = b.get(&base.id).await.unwrap();
        assert_eq!(on_a, on_b);
        assert_eq!(a.len(), 2);
    }

    #[tokio::test]
    async fn unavailable_target_fails_replication() {
        let source = InMemoryDocumentStore::new("source");
        let target = InMemoryDocumentStore::new("target");
        source.put(song("a")).await.unwrap();
        target.set_available(false);
        assert!(replicate(&source, &target, 0).await.is_err());
    }
}
