//! Watch center: directory -> monitor façade
//!
//! Maps canonical directory paths to their monitors, creating a monitor on
//! the first registration and tearing it down once the last watcher leaves.
//! Instances are independent; `WatchCenter::global()` is a convenience for
//! callers that want a single process-wide one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dirwatch_core::{FileStore, LocalFileStore};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::WatchConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, WatchError};
use crate::event::FileWatcher;
use crate::monitor::{DirectoryMonitor, MonitorContext, MonitorMap};

/// Entry point for registering watchers on directories
#[derive(Clone)]
pub struct WatchCenter {
    inner: Arc<CenterInner>,
}

struct CenterInner {
    monitors: Arc<MonitorMap>,
    context: MonitorContext,
    next_monitor_id: AtomicU64,
}

impl Drop for CenterInner {
    fn drop(&mut self) {
        for monitor in self.monitors.iter() {
            monitor.stop();
        }
        self.monitors.clear();
    }
}

struct GlobalCenter {
    center: WatchCenter,
    _runtime: tokio::runtime::Runtime,
}

static GLOBAL: OnceLock<GlobalCenter> = OnceLock::new();
static GLOBAL_INIT: parking_lot::Mutex<()> = parking_lot::const_mutex(());

impl WatchCenter {
    /// Create a center on the current tokio runtime, backed by the local disk
    pub fn new(config: WatchConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| WatchError::Runtime(e.to_string()))?;
        Self::with_store(config, Arc::new(LocalFileStore::new()), runtime)
    }

    /// Create a center with an injected store and executor
    pub fn with_store(config: WatchConfig, store: Arc<dyn FileStore>, runtime: Handle) -> Result<Self> {
        config.validate()?;

        let context = MonitorContext {
            store,
            config,
            dispatcher: Dispatcher::new(runtime.clone()),
            runtime,
        };

        Ok(Self {
            inner: Arc::new(CenterInner {
                monitors: Arc::new(DashMap::new()),
                context,
                next_monitor_id: AtomicU64::new(1),
            }),
        })
    }

    /// Process-wide center with default configuration and its own runtime
    pub fn global() -> Result<&'static WatchCenter> {
        if let Some(global) = GLOBAL.get() {
            return Ok(&global.center);
        }

        let _init = GLOBAL_INIT.lock();
        if GLOBAL.get().is_none() {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("watch-center")
                .enable_all()
                .build()?;
            let center = Self::with_store(
                WatchConfig::default(),
                Arc::new(LocalFileStore::new()),
                runtime.handle().clone(),
            )?;
            let _ = GLOBAL.set(GlobalCenter {
                center,
                _runtime: runtime,
            });
        }

        GLOBAL
            .get()
            .map(|global| &global.center)
            .ok_or_else(|| WatchError::Runtime("global watch center unavailable".to_string()))
    }

    pub fn config(&self) -> &WatchConfig {
        &self.inner.context.config
    }

    /// Register `watcher` for changes inside `dir`
    ///
    /// Registering the same watcher twice creates two registrations, each
    /// notified once per matching event.
    pub fn register_watcher(&self, dir: impl AsRef<Path>, watcher: Arc<dyn FileWatcher>) -> Result<()> {
        let key = self.validate_dir(dir.as_ref())?;
        let dispatcher = &self.inner.context.dispatcher;

        // Added while the entry guard is held, so a concurrent teardown of
        // the same path cannot interleave
        let (subscription_id, watchers) = self.with_monitor(key.clone(), |monitor| {
            let subscription = dispatcher.subscribe(watcher);
            let id = subscription.id();
            monitor.registry().add(subscription);
            (id, monitor.registry().len())
        })?;

        info!(
            dir = %key.display(),
            subscription = subscription_id,
            watchers,
            "Registered watcher"
        );
        Ok(())
    }

    /// Remove one registration of `watcher` from `dir`
    ///
    /// Returns false if it was not registered there. When the directory has
    /// no watchers left its monitor is stopped (after the idle grace, if set).
    pub fn deregister_watcher(&self, dir: impl AsRef<Path>, watcher: &Arc<dyn FileWatcher>) -> bool {
        let key = self.lookup_key(dir.as_ref());
        let Some(monitor) = self.monitor(&key) else {
            return false;
        };
        let Some(subscription) = monitor.registry().remove(watcher) else {
            return false;
        };
        subscription.deactivate();

        info!(
            dir = %key.display(),
            subscription = subscription.id(),
            watchers = monitor.registry().len(),
            "Deregistered watcher"
        );

        if monitor.registry().is_empty() {
            self.release_when_idle(key, monitor.id());
        }
        true
    }

    /// Validate `dir`, start monitoring it without a watcher, and return its
    /// canonical path
    ///
    /// The monitor is kept warm for the configured idle grace; if no watcher
    /// registers by then it is torn down.
    pub fn register_directory(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let key = self.validate_dir(dir.as_ref())?;
        let (id, idle) = self.with_monitor(key.clone(), |monitor| {
            (monitor.id(), monitor.registry().is_empty())
        })?;
        if idle {
            self.release_when_idle(key.clone(), id);
        }
        Ok(key)
    }

    /// Force-stop monitoring `dir`, dropping every registration
    pub fn stop_watching(&self, dir: impl AsRef<Path>) -> bool {
        let key = self.lookup_key(dir.as_ref());
        match self.inner.monitors.remove(&key) {
            Some((_, monitor)) => {
                shut_down(&monitor);
                true
            }
            None => false,
        }
    }

    /// Stop every monitor
    pub fn shutdown(&self) {
        let keys: Vec<PathBuf> = self.inner.monitors.iter().map(|m| m.key().clone()).collect();
        for key in keys {
            if let Some((_, monitor)) = self.inner.monitors.remove(&key) {
                shut_down(&monitor);
            }
        }
    }

    pub fn is_watching(&self, dir: impl AsRef<Path>) -> bool {
        let key = self.lookup_key(dir.as_ref());
        self.inner.monitors.contains_key(&key)
    }

    /// Canonical paths currently monitored, sorted
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.inner.monitors.iter().map(|m| m.key().clone()).collect();
        dirs.sort();
        dirs
    }

    pub fn watcher_count(&self, dir: impl AsRef<Path>) -> usize {
        let key = self.lookup_key(dir.as_ref());
        self.monitor(&key).map(|m| m.registry().len()).unwrap_or(0)
    }

    /// Completed detection cycles for `dir`, if it is monitored
    pub fn cycles(&self, dir: impl AsRef<Path>) -> Option<u64> {
        let key = self.lookup_key(dir.as_ref());
        self.monitor(&key).map(|m| m.cycles())
    }

    fn validate_dir(&self, dir: &Path) -> Result<PathBuf> {
        let store = &self.inner.context.store;
        if !store.exists(dir) {
            return Err(WatchError::invalid_path(dir, "does not exist"));
        }
        if !store.is_directory(dir) {
            return Err(WatchError::invalid_path(dir, "not a directory"));
        }
        Ok(store.canonicalize(dir)?)
    }

    /// Best-effort key for a directory that may no longer exist
    fn lookup_key(&self, dir: &Path) -> PathBuf {
        self.inner
            .context
            .store
            .canonicalize(dir)
            .unwrap_or_else(|_| dir.to_path_buf())
    }

    fn monitor(&self, key: &Path) -> Option<Arc<DirectoryMonitor>> {
        // Clone out so no shard guard outlives this call
        self.inner.monitors.get(key).map(|m| m.value().clone())
    }

    /// Run `f` on the monitor for `key` while its map entry is locked,
    /// starting a monitor first if there is none
    ///
    /// Starting scans the directory, so it happens with no shard locked.
    /// When two callers race, the first to publish wins and the other's
    /// monitor is stopped unused.
    fn with_monitor<R>(&self, key: PathBuf, f: impl FnOnce(&Arc<DirectoryMonitor>) -> R) -> Result<R> {
        if let Some(existing) = self.inner.monitors.get_mut(&key) {
            return Ok(f(existing.value()));
        }

        let id = self.inner.next_monitor_id.fetch_add(1, Ordering::Relaxed);
        let started = DirectoryMonitor::start(
            id,
            key.clone(),
            &self.inner.context,
            Arc::downgrade(&self.inner.monitors),
        )?;

        match self.inner.monitors.entry(key) {
            Entry::Occupied(entry) => {
                debug!(dir = %entry.key().display(), "Lost monitor start race, using the published one");
                started.stop();
                Ok(f(entry.get()))
            }
            Entry::Vacant(entry) => {
                let published = entry.insert(started);
                Ok(f(published.value()))
            }
        }
    }

    fn release_when_idle(&self, key: PathBuf, id: u64) {
        let grace = self.inner.context.config.idle_grace();
        if grace.is_zero() {
            reap_if_idle(&self.inner.monitors, &key, id);
            return;
        }

        debug!(dir = %key.display(), grace_ms = grace.as_millis() as u64, "Monitor idle, scheduling teardown");
        let monitors = Arc::downgrade(&self.inner.monitors);
        self.inner.context.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(monitors) = monitors.upgrade() {
                reap_if_idle(&monitors, &key, id);
            }
        });
    }
}

/// Remove and stop the monitor for `key` if it is still `id` and still empty
fn reap_if_idle(monitors: &MonitorMap, key: &Path, id: u64) -> bool {
    let removed = monitors.remove_if(key, |_, monitor| {
        monitor.id() == id && monitor.registry().is_empty()
    });
    match removed {
        Some((_, monitor)) => {
            monitor.stop();
            info!(dir = %key.display(), "No watchers left, monitor stopped");
            true
        }
        None => false,
    }
}

fn shut_down(monitor: &DirectoryMonitor) {
    monitor.stop();
    for subscription in monitor.registry().drain() {
        subscription.deactivate();
    }
    info!(dir = %monitor.path().display(), "Stopped watching directory");
}
