//! Event fan-out to registered watchers
//!
//! Every registration gets its own pending set drained by one worker task.
//! The worker runs `on_change` on the blocking pool and waits for it before
//! taking the next event, so calls for one registration never overlap and
//! arrive in detection order, while different registrations run in parallel.
//!
//! Pending events are coalesced by file name: while a slow watcher is busy,
//! further changes to a file it has not been told about yet fold into the one
//! queued event. The backlog is bounded by the number of distinct names.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::CallbackError;
use crate::event::{ChangeKind, FileChangeEvent, FileWatcher};

/// Fold a newer change into one still waiting for delivery
///
/// `None` means the two cancel out (created then deleted before delivery).
fn merge(queued: ChangeKind, next: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (queued, next) {
        (DirectoryRemoved, _) | (_, DirectoryRemoved) => Some(DirectoryRemoved),
        (Created, Modified) => Some(Created),
        (Created, Deleted) => None,
        (Deleted, Created) => Some(Modified),
        (_, next) => Some(next),
    }
}

/// Undelivered events of one registration, at most one per file name
#[derive(Debug, Default)]
struct Pending {
    order: VecDeque<String>,
    events: HashMap<String, FileChangeEvent>,
}

impl Pending {
    fn push(&mut self, event: FileChangeEvent) {
        let key = event.file_name().to_string();
        let Some(queued) = self.events.get_mut(&key) else {
            self.order.push_back(key.clone());
            self.events.insert(key, event);
            return;
        };

        match merge(queued.kind(), event.kind()) {
            Some(kind) => *queued = event.with_kind(kind),
            None => {
                self.events.remove(&key);
                self.order.retain(|name| name != &key);
            }
        }
    }

    fn pop(&mut self) -> Option<FileChangeEvent> {
        let key = self.order.pop_front()?;
        self.events.remove(&key)
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.events.clear();
    }
}

/// Shared between a subscription and its worker
#[derive(Debug)]
struct Mailbox {
    pending: Mutex<Pending>,
    wake: Notify,
    /// Cleared by `deactivate`; pending events are discarded
    active: AtomicBool,
    /// Cleared when the subscription is dropped; pending events still go out
    open: AtomicBool,
}

impl Mailbox {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// One registration of a watcher with a directory
pub struct Subscription {
    id: u64,
    watcher: Arc<dyn FileWatcher>,
    mailbox: Arc<Mailbox>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this registration holds exactly `watcher` (same allocation)
    pub fn is_watcher(&self, watcher: &Arc<dyn FileWatcher>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.watcher), Arc::as_ptr(watcher))
    }

    /// Stop delivering; undelivered events are dropped and the worker exits
    pub fn deactivate(&self) {
        self.mailbox.active.store(false, Ordering::Release);
        self.mailbox.pending.lock().clear();
        self.mailbox.wake.notify_one();
    }

    pub fn is_active(&self) -> bool {
        self.mailbox.is_active()
    }

    /// Events waiting for delivery
    pub fn backlog(&self) -> usize {
        self.mailbox.pending.lock().len()
    }

    /// Evaluate the interest predicate, treating a panic as "not interested"
    fn wants(&self, event: &FileChangeEvent) -> bool {
        if event.kind().is_directory_wide() {
            return true;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.watcher.interest(event.file_name()))) {
            Ok(interested) => interested,
            Err(payload) => {
                error!(
                    subscription = self.id,
                    file = %event.file_name(),
                    error = %CallbackError::from_panic(payload.as_ref()),
                    "Watcher interest predicate panicked"
                );
                false
            }
        }
    }

    fn enqueue(&self, event: FileChangeEvent) -> bool {
        if !self.is_active() {
            return false;
        }
        self.mailbox.pending.lock().push(event);
        self.mailbox.wake.notify_one();
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The worker delivers what is already queued, then exits
        self.mailbox.open.store(false, Ordering::Release);
        self.mailbox.wake.notify_one();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("backlog", &self.backlog())
            .finish()
    }
}

/// Creates subscriptions and fans events out to them
#[derive(Clone)]
pub struct Dispatcher {
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a registration and spawn its delivery worker
    ///
    /// The worker exits once the subscription is deactivated, or once it is
    /// dropped and everything already queued has been delivered.
    pub fn subscribe(&self, watcher: Arc<dyn FileWatcher>) -> Arc<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox {
            pending: Mutex::new(Pending::default()),
            wake: Notify::new(),
            active: AtomicBool::new(true),
            open: AtomicBool::new(true),
        });

        self.runtime
            .spawn(run_worker(id, watcher.clone(), mailbox.clone()));

        Arc::new(Subscription {
            id,
            watcher,
            mailbox,
        })
    }

    /// Hand `event` to every interested subscription; returns how many took it
    pub fn dispatch(&self, subscriptions: &[Arc<Subscription>], event: &FileChangeEvent) -> usize {
        let mut delivered = 0;
        for subscription in subscriptions {
            if subscription.wants(event) && subscription.enqueue(event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Run one callback, converting errors and panics into `CallbackError`
pub fn invoke(watcher: &dyn FileWatcher, event: &FileChangeEvent) -> Result<(), CallbackError> {
    match panic::catch_unwind(AssertUnwindSafe(|| watcher.on_change(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CallbackError::Failed(e)),
        Err(payload) => Err(CallbackError::from_panic(payload.as_ref())),
    }
}

async fn run_worker(id: u64, watcher: Arc<dyn FileWatcher>, mailbox: Arc<Mailbox>) {
    while mailbox.is_active() {
        let next = mailbox.pending.lock().pop();
        let Some(event) = next else {
            if !mailbox.is_open() {
                break;
            }
            // A notify sent before we get here leaves a permit behind
            mailbox.wake.notified().await;
            continue;
        };

        let description = event.to_string();
        let watcher = watcher.clone();
        let outcome = tokio::task::spawn_blocking(move || invoke(watcher.as_ref(), &event)).await;

        match outcome {
            Ok(Ok(())) => debug!(subscription = id, event = %description, "Delivered"),
            Ok(Err(e @ CallbackError::Failed(_))) => {
                warn!(subscription = id, event = %description, error = %e, "Watcher callback failed")
            }
            Ok(Err(e)) => {
                error!(subscription = id, event = %description, error = %e, "Watcher callback panicked")
            }
            Err(e) => {
                // Runtime is shutting down
                debug!(subscription = id, error = %e, "Delivery cancelled");
                break;
            }
        }
    }
    debug!(subscription = id, "Delivery worker stopped");
}
