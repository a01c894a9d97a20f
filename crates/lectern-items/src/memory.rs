//! In-memory items manager with customization hooks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use lectern_types::{ManagerId, OrderKey};

use crate::changes::ChangeNotifier;
use crate::error::{ItemsError, ItemsResult};
use crate::manager::{Item, ItemsManager, PageStream};
use crate::refs::{ObjectRef, RefKey};

/// Extension points of a [`MemoryManager`].
///
/// Every method has a default, so an empty impl gives a plain writable list.
#[async_trait]
pub trait MemoryHooks<T: Item>: Send + Sync + 'static {
    fn readonly(&self) -> bool {
        false
    }

    /// Sort key given to the ref of `object`. All refs share one key by
    /// default, which makes merges keep source order.
    fn order_key(&self, _object: &T) -> OrderKey {
        OrderKey::number(0.0)
    }

    /// Called before an object enters the list; may acquire resources and
    /// adjust the stored value.
    async fn create_object(&self, object: T) -> ItemsResult<T> {
        Ok(object)
    }

    /// Called after `removed` left the list.
    async fn on_remove(&self, _removed: &ObjectRef<T>) -> ItemsResult<()> {
        Ok(())
    }

    /// Produce the value replacing `current`.
    async fn on_update(&self, _current: &ObjectRef<T>, new_object: T) -> ItemsResult<T> {
        Ok(new_object)
    }

    /// Runs before each notification is delivered, with the list as it is
    /// at that point. A failure suppresses the notification.
    async fn on_change(&self, _items: Vec<ObjectRef<T>>) -> ItemsResult<()> {
        Ok(())
    }
}

/// Hooks with every default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<T: Item> MemoryHooks<T> for NoHooks {}

/// Items held in an ordered in-memory list.
///
/// `list` yields the whole current list as a single page, in insertion
/// order; updated items keep their position.
pub struct MemoryManager<T: Item, H: MemoryHooks<T> = NoHooks> {
    id: ManagerId,
    this: Weak<Self>,
    notifier: ChangeNotifier,
    hooks: H,
    items: RwLock<Vec<ObjectRef<T>>>,
    next_key: AtomicU64,
}

impl<T: Item> MemoryManager<T> {
    pub fn new() -> Arc<Self> {
        Self::with_hooks(NoHooks)
    }
}

impl<T: Item, H: MemoryHooks<T>> MemoryManager<T, H> {
    pub fn with_hooks(hooks: H) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ManagerId::next(),
            this: this.clone(),
            notifier: ChangeNotifier::new(),
            hooks,
            items: RwLock::new(Vec::new()),
            next_key: AtomicU64::new(1),
        })
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Copy of the current list.
    pub fn snapshot(&self) -> Vec<ObjectRef<T>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_ref(&self, object: T) -> ObjectRef<T> {
        let manager: Weak<dyn ItemsManager<T>> = self.this.clone();
        let key = RefKey::Memory(self.next_key.fetch_add(1, Ordering::Relaxed));
        ObjectRef::new(
            object.clone(),
            self.hooks.order_key(&object),
            key,
            manager,
            self.id,
        )
    }

    fn read_items(&self) -> ItemsResult<RwLockReadGuard<'_, Vec<ObjectRef<T>>>> {
        self.items.read().map_err(poisoned)
    }

    fn write_items(&self) -> ItemsResult<RwLockWriteGuard<'_, Vec<ObjectRef<T>>>> {
        self.items.write().map_err(poisoned)
    }

    fn position(&self, item: &ObjectRef<T>) -> ItemsResult<Option<usize>> {
        Ok(self.read_items()?.iter().position(|r| r.same_ref(item)))
    }

    fn check_writable(&self) -> ItemsResult<()> {
        if self.hooks.readonly() {
            Err(ItemsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Append objects without a readonly check or notification. Used to load
    /// initial content.
    pub async fn internal_add_all(&self, objects: Vec<T>) -> ItemsResult<Vec<ObjectRef<T>>> {
        let mut added = Vec::with_capacity(objects.len());
        for object in objects {
            let object = self.hooks.create_object(object).await?;
            let item = self.make_ref(object);
            self.write_items()?.push(item.clone());
            added.push(item);
        }
        Ok(added)
    }

    /// Replace the whole list at once under a single notification.
    pub async fn reset_list(&self, objects: Vec<T>) -> ItemsResult<Vec<ObjectRef<T>>> {
        self.check_writable()?;
        let mut fresh = Vec::with_capacity(objects.len());
        for object in objects {
            let object = self.hooks.create_object(object).await?;
            fresh.push(self.make_ref(object));
        }
        *self.write_items()? = fresh.clone();
        debug!(manager = %self.id, len = fresh.len(), "memory list reset");
        self.mark_change().await?;
        Ok(fresh)
    }
}

#[async_trait]
impl<T: Item, H: MemoryHooks<T>> ItemsManager<T> for MemoryManager<T, H> {
    fn id(&self) -> ManagerId {
        self.id
    }

    fn changes(&self) -> &ChangeNotifier {
        &self.notifier
    }

    fn readonly(&self) -> bool {
        self.hooks.readonly()
    }

    async fn add(&self, object: T) -> ItemsResult<ObjectRef<T>> {
        self.check_writable()?;
        let object = self.hooks.create_object(object).await?;
        let item = self.make_ref(object);
        self.write_items()?.push(item.clone());
        self.mark_change().await?;
        Ok(item)
    }

    async fn remove(&self, item: &ObjectRef<T>) -> ItemsResult<()> {
        self.check_writable()?;
        let removed = {
            let mut items = self.write_items()?;
            match items.iter().position(|r| r.same_ref(item)) {
                Some(index) => items.remove(index),
                None => return Ok(()),
            }
        };
        self.hooks.on_remove(&removed).await?;
        self.mark_change().await
    }

    async fn update(&self, item: &ObjectRef<T>, object: T) -> ItemsResult<ObjectRef<T>> {
        self.check_writable()?;
        if self.position(item)?.is_none() {
            return Err(ItemsError::StaleReference(format!(
                "item is no longer held by manager {}",
                self.id
            )));
        }
        let object = self.hooks.on_update(item, object).await?;
        let replacement = self.make_ref(object);
        {
            let mut items = self.write_items()?;
            let Some(index) = items.iter().position(|r| r.same_ref(item)) else {
                return Err(ItemsError::StaleReference(format!(
                    "item was removed from manager {} during update",
                    self.id
                )));
            };
            items[index] = replacement.clone();
        }
        self.mark_change().await?;
        Ok(replacement)
    }

    fn list(&self, _page_size: Option<usize>) -> PageStream<T> {
        let this = self.this.clone();
        stream::once(async move {
            let manager = this
                .upgrade()
                .ok_or_else(|| ItemsError::StaleReference("memory manager was dropped".into()))?;
            let items = manager.read_items()?.clone();
            Ok::<_, ItemsError>(items)
        })
        .boxed()
    }

    fn can_search(&self) -> bool {
        false
    }

    fn search(&self, _text: &str, _page_size: Option<usize>) -> PageStream<T> {
        stream::empty().boxed()
    }

    async fn notify_change(&self) -> ItemsResult<()> {
        self.hooks.on_change(self.snapshot()).await?;
        self.notifier.emit();
        Ok(())
    }
}

fn poisoned<E>(_: E) -> ItemsError {
    ItemsError::BackingUnavailable("memory list lock poisoned".into())
}

impl<T: Item, H: MemoryHooks<T>> std::fmt::Debug for MemoryManager<T, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}
