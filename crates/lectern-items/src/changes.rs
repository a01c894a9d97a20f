//! Payload-free change notification with batched emission.
//!
//! A [`ChangeNotifier`] fans a "something changed" signal out to its
//! subscribers. Compound operations open a batch; while any batch is open,
//! requested notifications are recorded instead of emitted, and closing the
//! outermost batch emits at most one.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct State {
    subscribers: BTreeMap<u64, Callback>,
    batch_depth: usize,
    pending: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    next_id: AtomicU64,
}

/// Observer list plus re-entrant batch counter. Clones share state.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    inner: Arc<Inner>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. It fires on every later emission; nothing
    /// emitted before this call is replayed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .insert(id, Arc::new(callback));
        Subscription {
            id,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Open a batch. Batches nest. An outermost batch starts with no
    /// pending change, whatever an abandoned earlier batch left behind.
    pub fn begin_batch(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.batch_depth == 0 {
            state.pending = false;
        }
        state.batch_depth += 1;
    }

    /// Close a batch. Returns `true` when this closed the outermost batch
    /// and a change was marked inside it; the caller must then emit.
    pub fn end_batch(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.batch_depth = state.batch_depth.saturating_sub(1);
        if state.batch_depth == 0 && state.pending {
            state.pending = false;
            true
        } else {
            false
        }
    }

    /// Open a batch that closes when the guard is finished or dropped.
    pub fn batch(&self) -> BatchGuard {
        self.begin_batch();
        BatchGuard {
            notifier: Some(self.clone()),
        }
    }

    pub fn in_batch(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batch_depth
            > 0
    }

    /// Request a notification. Returns `true` when the caller must emit now,
    /// `false` when the request was deferred to the enclosing batch.
    pub fn mark_change(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.batch_depth == 0 {
            state.pending = false;
            true
        } else {
            state.pending = true;
            false
        }
    }

    /// Call every subscriber once. Callbacks run outside the lock, so they
    /// may subscribe, unsubscribe or signal other notifiers.
    pub fn emit(&self) {
        let callbacks: Vec<Callback> = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    /// [`mark_change`](Self::mark_change) and emit if not deferred.
    pub fn signal(&self) {
        if self.mark_change() {
            self.emit();
        }
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &state.subscribers.len())
            .field("batch_depth", &state.batch_depth)
            .field("pending", &state.pending)
            .finish()
    }
}

/// Handle to one registered callback.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Subscription::unsubscribe).
#[must_use = "a subscription stays registered until unsubscribe() is called"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    notifier: Weak<Inner>,
}

impl Subscription {
    /// Remove the callback. Returns `false` if the notifier is gone.
    pub fn unsubscribe(self) -> bool {
        match self.notifier.upgrade() {
            Some(inner) => inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .remove(&self.id)
                .is_some(),
            None => false,
        }
    }
}

/// An open batch on a [`ChangeNotifier`].
///
/// If dropped without [`finish`](BatchGuard::finish) (for example when the
/// owning future is cancelled), the batch is closed and any marked change
/// stays pending for the next unbatched notification.
#[must_use]
pub struct BatchGuard {
    notifier: Option<ChangeNotifier>,
}

impl BatchGuard {
    /// Close the batch. Same return contract as [`ChangeNotifier::end_batch`].
    pub fn finish(mut self) -> bool {
        self.notifier.take().is_some_and(|n| n.end_batch())
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            let mut state = notifier.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.batch_depth = state.batch_depth.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(notifier: &ChangeNotifier) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = notifier.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn signal_outside_batch_emits_immediately() {
        let n = ChangeNotifier::new();
        let (count, _sub) = counter(&n);
        n.signal();
        n.signal();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_batches_coalesce_to_one_emission() {
        let n = ChangeNotifier::new();
        let (count, _sub) = counter(&n);
        n.begin_batch();
        n.signal();
        n.begin_batch();
        n.signal();
        assert!(!n.end_batch());
        n.signal();
        assert!(n.end_batch());
        n.emit();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_batch_emits_nothing() {
        let n = ChangeNotifier::new();
        n.begin_batch();
        assert!(!n.end_batch());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let n = ChangeNotifier::new();
        let (count, sub) = counter(&n);
        assert_eq!(n.subscriber_count(), 1);
        assert!(sub.unsubscribe());
        n.signal();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(n.subscriber_count(), 0);
    }

    #[test]
    fn late_subscriber_sees_no_replay() {
        let n = ChangeNotifier::new();
        n.signal();
        let (count, _sub) = counter(&n);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_guard_closes_batch() {
        let n = ChangeNotifier::new();
        {
            let _guard = n.batch();
            assert!(n.in_batch());
            n.signal();
        }
        assert!(!n.in_batch());
    }

    #[test]
    fn abandoned_batch_does_not_leak_into_the_next() {
        let n = ChangeNotifier::new();
        {
            let _guard = n.batch();
            n.signal();
        }
        n.signal();
        n.begin_batch();
        assert!(!n.end_batch());

        {
            let _guard = n.batch();
            n.signal();
        }
        n.begin_batch();
        assert!(!n.end_batch());
    }

    #[test]
    fn callback_may_unsubscribe_during_emit() {
        let n = ChangeNotifier::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let sub = n.subscribe(move || {
            if let Some(sub) = s.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);
        n.signal();
        assert_eq!(n.subscriber_count(), 0);
    }
}
