use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};

use lectern_types::{DocId, ManagerId, OrderKey, Revision};

use crate::manager::{Item, ItemsManager};

/// What identifies a ref within its manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefKey {
    /// Slot minted by an in-memory manager; a new one per add or update.
    Memory(u64),
    /// A stored document version.
    Document { id: DocId, revision: Revision },
}

/// A handle uniting an object value with its owning manager and sort key.
///
/// The manager is held weakly: a ref never keeps its manager alive. Refs are
/// values; `update` returns a new ref and the old one becomes stale.
pub struct ObjectRef<T: Item> {
    pub object: T,
    pub order_key: OrderKey,
    pub key: RefKey,
    manager: Weak<dyn ItemsManager<T>>,
    manager_id: ManagerId,
}

impl<T: Item> ObjectRef<T> {
    pub fn new(
        object: T,
        order_key: OrderKey,
        key: RefKey,
        manager: Weak<dyn ItemsManager<T>>,
        manager_id: ManagerId,
    ) -> Self {
        Self {
            object,
            order_key,
            key,
            manager,
            manager_id,
        }
    }

    /// The owning manager, if it is still alive.
    pub fn manager(&self) -> Option<Arc<dyn ItemsManager<T>>> {
        self.manager.upgrade()
    }

    pub fn manager_id(&self) -> ManagerId {
        self.manager_id
    }

    /// Whether both refs designate the same item version of the same manager.
    pub fn same_ref(&self, other: &Self) -> bool {
        self.manager_id == other.manager_id && self.key == other.key
    }

    pub fn document_id(&self) -> Option<&DocId> {
        match &self.key {
            RefKey::Document { id, .. } => Some(id),
            RefKey::Memory(_) => None,
        }
    }

    pub fn revision(&self) -> Option<&Revision> {
        match &self.key {
            RefKey::Document { revision, .. } => Some(revision),
            RefKey::Memory(_) => None,
        }
    }
}

impl<T: Item> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            order_key: self.order_key.clone(),
            key: self.key.clone(),
            manager: self.manager.clone(),
            manager_id: self.manager_id,
        }
    }
}

impl<T: Item + fmt::Debug> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("object", &self.object)
            .field("order_key", &self.order_key)
            .field("key", &self.key)
            .field("manager", &self.manager_id)
            .finish()
    }
}

/// Ascending order-key comparison, the sort used by every merge.
pub fn by_order_key<T: Item>(a: &ObjectRef<T>, b: &ObjectRef<T>) -> Ordering {
    a.order_key.cmp(&b.order_key)
}
