//! Per-directory watcher registry
//!
//! Copy-on-write: a detection cycle takes an `Arc` snapshot of the current
//! subscriptions and dispatches against it, so a concurrent register or
//! deregister is seen either entirely or not at all.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::dispatch::Subscription;
use crate::event::FileWatcher;

pub type SubscriptionSet = Arc<Vec<Arc<Subscription>>>;

#[derive(Debug, Default)]
pub struct WatcherRegistry {
    subscriptions: RwLock<SubscriptionSet>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Arc<Subscription>) {
        let mut guard = self.subscriptions.write();
        // Clones the vector only if a reader still holds the old snapshot
        Arc::make_mut(&mut guard).push(subscription);
    }

    /// Remove one registration of `watcher`
    pub fn remove(&self, watcher: &Arc<dyn FileWatcher>) -> Option<Arc<Subscription>> {
        let mut guard = self.subscriptions.write();
        let position = guard.iter().position(|s| s.is_watcher(watcher))?;
        Some(Arc::make_mut(&mut guard).remove(position))
    }

    /// Remove every registration
    pub fn drain(&self) -> Vec<Arc<Subscription>> {
        let mut guard = self.subscriptions.write();
        let drained = std::mem::take(&mut *guard);
        Arc::try_unwrap(drained).unwrap_or_else(|shared| shared.as_ref().clone())
    }

    /// Current set, stable for as long as the caller holds it
    pub fn snapshot(&self) -> SubscriptionSet {
        self.subscriptions.read().clone()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}
