use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use lectern_types::ManagerId;

use crate::changes::{ChangeNotifier, Subscription};
use crate::error::{ItemsError, ItemsResult};
use crate::manager::{Item, ItemsManager, PageStream};
use crate::refs::ObjectRef;
use crate::stream::{merge_pages, DEFAULT_PAGE_SIZE};

struct Child<T: Item> {
    manager: Arc<dyn ItemsManager<T>>,
    subscription: Subscription,
}

/// Read-only union of several managers, listed as one stream sorted by
/// order key.
///
/// Children are matched by [`ManagerId`]. Changes to the child set and
/// notifications from any child are re-emitted; a whole
/// [`set_managers`](MergeManager::set_managers) call emits at most once.
pub struct MergeManager<T: Item> {
    id: ManagerId,
    notifier: ChangeNotifier,
    children: RwLock<Vec<Child<T>>>,
}

impl<T: Item> MergeManager<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ManagerId::next(),
            notifier: ChangeNotifier::new(),
            children: RwLock::new(Vec::new()),
        })
    }

    /// Current children, in merge priority order.
    pub fn managers(&self) -> Vec<Arc<dyn ItemsManager<T>>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.manager.clone())
            .collect()
    }

    /// Make `managers` the child set: keep those already present, add the
    /// new ones in the given order, drop the rest.
    pub fn set_managers(&self, managers: Vec<Arc<dyn ItemsManager<T>>>) {
        let batch = self.notifier.batch();
        let wanted: Vec<ManagerId> = managers.iter().map(|m| m.id()).collect();
        let stale: Vec<ManagerId> = self
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| c.manager.id())
            .filter(|id| !wanted.contains(id))
            .collect();
        for manager in managers {
            self.add_manager(manager);
        }
        for id in stale {
            self.remove_manager(id);
        }
        if batch.finish() {
            self.notifier.emit();
        }
    }

    /// Add a child unless it is already present.
    pub fn add_manager(&self, manager: Arc<dyn ItemsManager<T>>) {
        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        if children.iter().any(|c| c.manager.id() == manager.id()) {
            return;
        }
        let relay = self.notifier.clone();
        let subscription = manager.changes().subscribe(move || relay.signal());
        debug!(merge = %self.id, child = %manager.id(), "child manager added");
        children.push(Child {
            manager,
            subscription,
        });
        drop(children);
        self.notifier.signal();
    }

    pub fn remove_manager(&self, id: ManagerId) {
        let removed = {
            let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
            let index = children.iter().position(|c| c.manager.id() == id);
            index.map(|index| children.remove(index))
        };
        if let Some(child) = removed {
            child.subscription.unsubscribe();
            debug!(merge = %self.id, child = %id, "child manager removed");
            self.notifier.signal();
        }
    }
}

#[async_trait]
impl<T: Item> ItemsManager<T> for MergeManager<T> {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn changes(&self) -> &ChangeNotifier {
        &self.notifier
    }

    fn readonly(&self) -> bool {
        true
    }

    async fn add(&self, _object: T) -> ItemsResult<ObjectRef<T>> {
        Err(ItemsError::ReadOnly)
    }

    async fn add_all(&self, _objects: Vec<T>) -> ItemsResult<Vec<ObjectRef<T>>> {
        Err(ItemsError::ReadOnly)
    }

    async fn remove(&self, _item: &ObjectRef<T>) -> ItemsResult<()> {
        Err(ItemsError::ReadOnly)
    }

    async fn remove_all(&self, _items: &[ObjectRef<T>]) -> ItemsResult<()> {
        Err(ItemsError::ReadOnly)
    }

    async fn update(&self, _item: &ObjectRef<T>, _object: T) -> ItemsResult<ObjectRef<T>> {
        Err(ItemsError::ReadOnly)
    }

    fn list(&self, page_size: Option<usize>) -> PageStream<T> {
        let sources = self
            .managers()
            .iter()
            .map(|m| m.list(page_size))
            .collect();
        merge_pages(sources, page_size.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    fn can_search(&self) -> bool {
        self.managers().iter().any(|m| m.can_search())
    }

    fn search(&self, text: &str, page_size: Option<usize>) -> PageStream<T> {
        let sources = self
            .managers()
            .iter()
            .map(|m| m.search(text, page_size))
            .collect();
        merge_pages(sources, page_size.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    async fn update_search_index(&self) -> ItemsResult<()> {
        for manager in self.managers() {
            manager.update_search_index().await?;
        }
        Ok(())
    }

    fn dispose(&self) {
        let children = std::mem::take(&mut *self.children.write().unwrap_or_else(PoisonError::into_inner));
        for child in children {
            child.subscription.unsubscribe();
        }
    }
}
