//! The [`ItemsManager`] contract shared by every backing strategy.

use async_trait::async_trait;
use futures::stream::BoxStream;

use lectern_types::ManagerId;

use crate::changes::ChangeNotifier;
use crate::error::ItemsResult;
use crate::refs::ObjectRef;

/// Anything a manager can hold.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Item for T {}

/// Lazy sequence of pages of refs.
///
/// Nothing is fetched until the stream is polled. Dropping it mid-way
/// releases everything it holds.
pub type PageStream<T> = BoxStream<'static, ItemsResult<Vec<ObjectRef<T>>>>;

/// A collection of versioned objects that can be listed, searched and
/// mutated uniformly, whatever holds them.
///
/// # Notifications
///
/// Every successful mutation requests one change notification through
/// [`mark_change`](ItemsManager::mark_change). While a batch is open on
/// [`changes`](ItemsManager::changes), requests are coalesced and the
/// outermost batch emits once when it closes.
///
/// # Pagination
///
/// `list` and `search` start over from the first page on every call. Order
/// is stable within one call; after a notification, consumers re-list
/// instead of diffing.
#[async_trait]
pub trait ItemsManager<T: Item>: Send + Sync {
    /// Stable identity of this manager instance.
    fn id(&self) -> ManagerId;

    fn changes(&self) -> &ChangeNotifier;

    /// Consulted before every mutation; may change over time.
    fn readonly(&self) -> bool;

    async fn add(&self, object: T) -> ItemsResult<ObjectRef<T>>;

    /// Add every object under a single notification.
    ///
    /// The batch is closed even if one of the adds fails; the refs added
    /// before the failure stay added.
    async fn add_all(&self, objects: Vec<T>) -> ItemsResult<Vec<ObjectRef<T>>> {
        let batch = self.changes().batch();
        let mut added = Vec::with_capacity(objects.len());
        let mut result = Ok(());
        for object in objects {
            match self.add(object).await {
                Ok(item) => added.push(item),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if batch.finish() {
            self.notify_change().await?;
        }
        result.map(|()| added)
    }

    /// Remove an item. Removing a ref this manager does not hold is a no-op.
    async fn remove(&self, item: &ObjectRef<T>) -> ItemsResult<()>;

    async fn remove_all(&self, items: &[ObjectRef<T>]) -> ItemsResult<()> {
        let batch = self.changes().batch();
        let mut result = Ok(());
        for item in items {
            if let Err(e) = self.remove(item).await {
                result = Err(e);
                break;
            }
        }
        if batch.finish() {
            self.notify_change().await?;
        }
        result
    }

    /// Replace the object behind `item`, returning the ref to the new version.
    ///
    /// Fails with [`ItemsError::StaleReference`](crate::ItemsError::StaleReference)
    /// if `item` is no longer held.
    async fn update(&self, item: &ObjectRef<T>, object: T) -> ItemsResult<ObjectRef<T>>;

    /// Pages of at most `page_size` refs (manager default when `None`).
    fn list(&self, page_size: Option<usize>) -> PageStream<T>;

    fn can_search(&self) -> bool;

    /// Pages of matching refs, most relevant first. Empty when
    /// [`can_search`](ItemsManager::can_search) is false.
    fn search(&self, text: &str, page_size: Option<usize>) -> PageStream<T>;

    /// Build or refresh any out-of-band search index. Idempotent.
    async fn update_search_index(&self) -> ItemsResult<()> {
        Ok(())
    }

    /// Deliver one notification to subscribers, unconditionally.
    async fn notify_change(&self) -> ItemsResult<()> {
        self.changes().emit();
        Ok(())
    }

    /// Request a notification, deferred if a batch is open.
    async fn mark_change(&self) -> ItemsResult<()> {
        if self.changes().mark_change() {
            self.notify_change().await
        } else {
            Ok(())
        }
    }

    /// Release subscriptions this manager holds on others.
    fn dispose(&self) {}
}
