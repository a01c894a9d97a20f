use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use lectern_types::ManagerId;

use crate::changes::{ChangeNotifier, Subscription};
use crate::error::ItemsResult;
use crate::manager::{Item, ItemsManager, PageStream};
use crate::refs::ObjectRef;
use crate::stream::{filter_items, flatten, take_items, DEFAULT_PAGE_SIZE};

type Predicate<T> = Arc<dyn Fn(&ObjectRef<T>) -> bool + Send + Sync>;

/// A predicate-filtered view of a parent manager.
///
/// Mutations go straight to the parent. Listing re-batches the parent's
/// filtered stream, so pages may be short. Parent notifications are
/// re-emitted until [`dispose`](ItemsManager::dispose).
pub struct FilteredManager<T: Item> {
    id: ManagerId,
    notifier: ChangeNotifier,
    parent: Arc<dyn ItemsManager<T>>,
    predicate: Predicate<T>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T: Item> FilteredManager<T> {
    pub fn new<F>(parent: Arc<dyn ItemsManager<T>>, predicate: F) -> Arc<Self>
    where
        F: Fn(&ObjectRef<T>) -> bool + Send + Sync + 'static,
    {
        let notifier = ChangeNotifier::new();
        let relay = notifier.clone();
        let subscription = parent.changes().subscribe(move || relay.signal());
        Arc::new(Self {
            id: ManagerId::next(),
            notifier,
            parent,
            predicate: Arc::new(predicate),
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn parent(&self) -> &Arc<dyn ItemsManager<T>> {
        &self.parent
    }

    fn filtered(&self, pages: PageStream<T>, page_size: Option<usize>) -> PageStream<T> {
        let predicate = self.predicate.clone();
        take_items(
            filter_items(flatten(pages), move |item| predicate(item)),
            page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }
}

#[async_trait]
impl<T: Item> ItemsManager<T> for FilteredManager<T> {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn changes(&self) -> &ChangeNotifier {
        &self.notifier
    }

    fn readonly(&self) -> bool {
        self.parent.readonly()
    }

    async fn add(&self, object: T) -> ItemsResult<ObjectRef<T>> {
        self.parent.add(object).await
    }

    async fn remove(&self, item: &ObjectRef<T>) -> ItemsResult<()> {
        self.parent.remove(item).await
    }

    async fn update(&self, item: &ObjectRef<T>, object: T) -> ItemsResult<ObjectRef<T>> {
        self.parent.update(item, object).await
    }

    fn list(&self, page_size: Option<usize>) -> PageStream<T> {
        self.filtered(self.parent.list(page_size), page_size)
    }

    fn can_search(&self) -> bool {
        self.parent.can_search()
    }

    fn search(&self, text: &str, page_size: Option<usize>) -> PageStream<T> {
        self.filtered(self.parent.search(text, page_size), page_size)
    }

    async fn update_search_index(&self) -> ItemsResult<()> {
        self.parent.update_search_index().await
    }

    fn dispose(&self) {
        if let Some(subscription) = self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryManager;
    use crate::partial::to_partial_list;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn values(manager: &dyn ItemsManager<i32>) -> Vec<i32> {
        let mut list = to_partial_list(manager.list(None)).await.unwrap();
        while list.has_more() {
            list = list.fetch_more().await.unwrap();
        }
        list.items().iter().map(|r| r.object).collect()
    }

    async fn evens() -> (Arc<MemoryManager<i32>>, Arc<FilteredManager<i32>>) {
        let parent = MemoryManager::<i32>::new();
        parent.add_all(vec![1, 2, 3, 4]).await.unwrap();
        let filtered = FilteredManager::new(parent.clone(), |r: &ObjectRef<i32>| r.object % 2 == 0);
        (parent, filtered)
    }

    #[tokio::test]
    async fn lists_only_matching_items() {
        let (_, filtered) = evens().await;
        assert_eq!(values(&*filtered).await, vec![2, 4]);
    }

    #[tokio::test]
    async fn mutations_land_in_the_parent() {
        let (parent, filtered) = evens().await;
        filtered.add(6).await.unwrap();
        filtered.add(7).await.unwrap();
        assert_eq!(values(&*parent).await, vec![1, 2, 3, 4, 6, 7]);
        assert_eq!(values(&*filtered).await, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn rebatches_to_requested_page_size() {
        let parent = MemoryManager::<i32>::new();
        parent.add_all((1..=10).collect()).await.unwrap();
        let filtered = FilteredManager::new(parent.clone(), |r: &ObjectRef<i32>| r.object > 3);
        let pages: Vec<Vec<ObjectRef<i32>>> = filtered.list(Some(3)).try_collect().await.unwrap();
        let sizes: Vec<usize> = pages.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn relays_parent_notifications_until_disposed() {
        let (parent, filtered) = evens().await;
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = filtered.changes().subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        parent.add(8).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        filtered.dispose();
        assert_eq!(parent.changes().subscriber_count(), 0);
        parent.add(10).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
