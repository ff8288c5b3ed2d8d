//! Subscriber registry shared by transfers and tasks.
//!
//! Callbacks are cloned out of the lock before they run, so a callback may
//! subscribe, unsubscribe or emit on the same registry without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::transfer::lock;

/// Token returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Listeners<E> {
    inner: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: Callback<E>) -> SubscriptionId {
        let id = SubscriptionId::next();
        lock(&self.inner).push((id, callback));
        id
    }

    /// Returns false if the id was not registered (already removed).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = lock(&self.inner);
        let before = guard.len();
        guard.retain(|(existing, _)| *existing != id);
        guard.len() != before
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = lock(&self.inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(event);
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}
