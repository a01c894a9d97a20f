use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;

use crate::error::ItemsResult;

struct Cursor<T> {
    pages: BoxStream<'static, ItemsResult<Vec<T>>>,
    fetched: Vec<T>,
    done: bool,
}

/// An immutable snapshot of the items fetched so far from a page stream.
///
/// [`fetch_more`](PartialList::fetch_more) returns a new, longer snapshot
/// and leaves this one untouched. Snapshots taken from the same source share
/// one cursor, so every call pulls the next unread page.
pub struct PartialList<T> {
    items: Vec<T>,
    cursor: Option<Arc<Mutex<Cursor<T>>>>,
}

impl<T: Clone + Send + 'static> PartialList<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Whether [`fetch_more`](PartialList::fetch_more) may return more items.
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    /// Pull the next page. Once the source is exhausted the returned
    /// snapshot has no more to fetch.
    pub async fn fetch_more(&self) -> ItemsResult<PartialList<T>> {
        let Some(cursor) = &self.cursor else {
            return Ok(Self {
                items: self.items.clone(),
                cursor: None,
            });
        };
        advance(cursor.clone()).await
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PartialList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialList")
            .field("items", &self.items)
            .field("has_more", &self.cursor.is_some())
            .finish()
    }
}

async fn advance<T: Clone>(cursor: Arc<Mutex<Cursor<T>>>) -> ItemsResult<PartialList<T>> {
    let mut state = cursor.lock().await;
    if !state.done {
        match state.pages.next().await {
            Some(page) => {
                let page = page?;
                state.fetched.extend(page);
            }
            None => state.done = true,
        }
    }
    let items = state.fetched.clone();
    let more = !state.done;
    drop(state);
    Ok(PartialList {
        items,
        cursor: more.then_some(cursor),
    })
}

/// Snapshot holding the first page of `pages`.
pub async fn to_partial_list<T: Clone + Send + 'static>(
    pages: BoxStream<'static, ItemsResult<Vec<T>>>,
) -> ItemsResult<PartialList<T>> {
    let cursor = Arc::new(Mutex::new(Cursor {
        pages,
        fetched: Vec::new(),
        done: false,
    }));
    advance(cursor).await
}
