//! Lazy combinators over paginated streams.
//!
//! Every combinator here is pull-based: it fetches from its sources only
//! when polled, and holds nothing but its sources and its own state, so
//! dropping the result cancels cleanly.

use std::cmp::Ordering;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::ItemsResult;
use crate::manager::Item;
use crate::refs::{by_order_key, ObjectRef};

/// Page size used when a caller re-batches without asking for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Pages flattened into single items.
pub fn flatten<T: Send + 'static>(
    pages: BoxStream<'static, ItemsResult<Vec<T>>>,
) -> BoxStream<'static, ItemsResult<T>> {
    pages
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
}

/// Items for which `keep` holds. Errors pass through.
pub fn filter_items<T, F>(
    items: BoxStream<'static, ItemsResult<T>>,
    keep: F,
) -> BoxStream<'static, ItemsResult<T>>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    items
        .try_filter(move |item| futures::future::ready(keep(item)))
        .boxed()
}

/// Re-batch items into pages of `limit`. Only the last page may be short,
/// and an empty source yields no page at all.
pub fn take_items<T: Send + 'static>(
    items: BoxStream<'static, ItemsResult<T>>,
    limit: usize,
) -> BoxStream<'static, ItemsResult<Vec<T>>> {
    items
        .try_chunks(limit.max(1))
        .map_err(|e| e.1)
        .boxed()
}

struct Cursor<T> {
    source: BoxStream<'static, ItemsResult<T>>,
    head: Option<T>,
}

struct Merge<T, F> {
    unprimed: Vec<BoxStream<'static, ItemsResult<T>>>,
    cursors: Vec<Cursor<T>>,
    /// Cursor whose head was yielded last; advanced on the next poll.
    consumed: Option<usize>,
    cmp: F,
    done: bool,
}

/// K-way merge of individually sorted sources into one sorted stream.
///
/// Each step yields the smallest head among the live sources; equal heads
/// go to the source listed first. Only the source just consumed is pulled
/// again, and only when the next item is requested. The first error ends
/// the stream.
pub fn take_smallest<T, F>(
    sources: Vec<BoxStream<'static, ItemsResult<T>>>,
    cmp: F,
) -> BoxStream<'static, ItemsResult<T>>
where
    T: Send + 'static,
    F: Fn(&T, &T) -> Ordering + Send + 'static,
{
    let state = Merge {
        unprimed: sources,
        cursors: Vec::new(),
        consumed: None,
        cmp,
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        for mut source in std::mem::take(&mut st.unprimed) {
            match source.next().await {
                Some(Ok(head)) => st.cursors.push(Cursor {
                    source,
                    head: Some(head),
                }),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {}
            }
        }
        if let Some(index) = st.consumed.take() {
            match st.cursors[index].source.next().await {
                Some(Ok(head)) => st.cursors[index].head = Some(head),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.cursors.remove(index);
                }
            }
        }

        let mut best: Option<usize> = None;
        for (index, cursor) in st.cursors.iter().enumerate() {
            let Some(head) = cursor.head.as_ref() else {
                continue;
            };
            let better = match best.and_then(|b| st.cursors[b].head.as_ref()) {
                Some(current) => (st.cmp)(head, current) == Ordering::Less,
                None => true,
            };
            if better {
                best = Some(index);
            }
        }
        let index = best?;
        let item = st.cursors[index].head.take()?;
        st.consumed = Some(index);
        Some((Ok(item), st))
    })
    .boxed()
}

/// Merge page streams sorted by order key into pages of `limit`.
pub fn merge_pages<T: Item>(
    sources: Vec<BoxStream<'static, ItemsResult<Vec<ObjectRef<T>>>>>,
    limit: usize,
) -> BoxStream<'static, ItemsResult<Vec<ObjectRef<T>>>> {
    let items = sources.into_iter().map(flatten).collect();
    take_items(take_smallest(items, by_order_key::<T>), limit)
}
