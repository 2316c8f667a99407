//! Directory monitors
//!
//! One monitor per watched directory. Its detection task is the only owner
//! of the directory's snapshot; cycles never overlap, and cycle N+1 starts
//! only after cycle N has updated the snapshot and handed its events to the
//! dispatcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dirwatch_core::{FileStore, Fingerprint, FingerprintPolicy};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Backend, WatchConfig};
use crate::debounce::{PendingBatch, PendingNames, RawSignal};
use crate::dispatch::Dispatcher;
use crate::error::{Result, WatchError};
use crate::event::{ChangeKind, FileChangeEvent};
use crate::platform::NativeSubscription;
use crate::reconcile::{self, Probe};
use crate::registry::WatcherRegistry;
use crate::snapshot::{Change, ScanResult, Snapshot};

/// Canonical directory path -> its monitor
pub type MonitorMap = DashMap<PathBuf, Arc<DirectoryMonitor>>;

/// Collaborators shared by every monitor of one `WatchCenter`
#[derive(Clone)]
pub struct MonitorContext {
    pub store: Arc<dyn FileStore>,
    pub config: WatchConfig,
    pub dispatcher: Dispatcher,
    pub runtime: Handle,
}

/// Watches one directory on behalf of its registered watchers
pub struct DirectoryMonitor {
    id: u64,
    path: PathBuf,
    backend: Backend,
    registry: WatcherRegistry,
    shutdown: watch::Sender<bool>,
    cycles: AtomicU64,
}

impl DirectoryMonitor {
    /// Take the baseline snapshot and spawn the detection task
    ///
    /// The baseline is taken before returning, so any change made after a
    /// successful registration is observed.
    pub fn start(
        id: u64,
        path: PathBuf,
        context: &MonitorContext,
        monitors: Weak<MonitorMap>,
    ) -> Result<Arc<Self>> {
        let policy = context.config.fingerprint_policy();

        // Subscribe before the baseline scan so nothing slips between them
        let native = match context.config.backend {
            Backend::Poll => None,
            Backend::Native => match NativeSubscription::subscribe(&path) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!(dir = %path.display(), error = %e, "Native watch unavailable, falling back to polling");
                    None
                }
            },
        };

        let baseline = reconcile::scan_directory(context.store.as_ref(), &path, &policy, &HashMap::new())
            .map_err(|e| classify(&path, e))?;
        let backend = if native.is_some() { Backend::Native } else { Backend::Poll };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let monitor = Arc::new(Self {
            id,
            path,
            backend,
            registry: WatcherRegistry::new(),
            shutdown,
            cycles: AtomicU64::new(0),
        });

        info!(
            dir = %monitor.path.display(),
            backend = ?backend,
            files = baseline.fingerprints.len(),
            "Starting directory monitor"
        );

        let detector = Detector {
            monitor: monitor.clone(),
            store: context.store.clone(),
            policy,
            dispatcher: context.dispatcher.clone(),
            snapshot: Snapshot::from_scan(baseline),
            shutdown: shutdown_rx,
            monitors,
        };
        let poll_interval = context.config.poll_interval();
        match native {
            Some((subscription, rx)) => {
                let window = context.config.coalesce_window();
                context
                    .runtime
                    .spawn(detector.run_native(subscription, rx, window, poll_interval));
            }
            None => {
                context.runtime.spawn(detector.run_poll(poll_interval));
            }
        }

        Ok(monitor)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backend actually in use (native may have fallen back to poll)
    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    /// Completed detection cycles
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Signal the detection task to exit after any in-flight cycle
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            debug!(dir = %self.path.display(), "Stopping directory monitor");
        }
    }
}

/// Map a store failure on the watched directory itself
fn classify(dir: &Path, err: dirwatch_core::StoreError) -> WatchError {
    if err.is_gone() {
        WatchError::DirectoryRemoved(dir.to_path_buf())
    } else {
        WatchError::Store(err)
    }
}

/// Run blocking disk work off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WatchError::Runtime(e.to_string()))
}

/// Why a native signal loop returned
#[derive(Debug, PartialEq, Eq)]
enum SignalsEnd {
    Stopped,
    Removed,
    /// The notify side hung up
    Closed,
}

/// State owned by a monitor's detection task
struct Detector {
    monitor: Arc<DirectoryMonitor>,
    store: Arc<dyn FileStore>,
    policy: FingerprintPolicy,
    dispatcher: Dispatcher,
    snapshot: Snapshot,
    shutdown: watch::Receiver<bool>,
    monitors: Weak<MonitorMap>,
}

impl Detector {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run_poll(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if self.stopping() {
                break;
            }

            match self.full_cycle().await {
                Ok(()) => self.finish_cycle(),
                Err(WatchError::DirectoryRemoved(_)) => {
                    self.directory_removed();
                    return;
                }
                Err(e) => {
                    warn!(dir = %self.monitor.path.display(), error = %e, "Detection cycle failed, retrying");
                }
            }
        }

        debug!(dir = %self.monitor.path.display(), "Poll loop stopped");
    }

    async fn run_native(
        mut self,
        subscription: NativeSubscription,
        rx: mpsc::UnboundedReceiver<RawSignal>,
        window: Duration,
        fallback_interval: Duration,
    ) {
        let end = self.run_signals(rx, window).await;
        drop(subscription);

        match end {
            SignalsEnd::Closed => {
                // The notify thread went away underneath us
                warn!(dir = %self.monitor.path.display(), "Native subscription closed, falling back to polling");
                self.run_poll(fallback_interval).await;
            }
            SignalsEnd::Stopped => debug!(dir = %self.monitor.path.display(), "Native loop stopped"),
            SignalsEnd::Removed => {}
        }
    }

    /// Coalesce raw signals into windows and run one cycle per window
    async fn run_signals(&mut self, mut rx: mpsc::UnboundedReceiver<RawSignal>, window: Duration) -> SignalsEnd {
        let mut pending = PendingNames::new(&self.monitor.path);

        loop {
            if pending.is_empty() {
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => return SignalsEnd::Stopped,
                    signal = rx.recv() => match signal {
                        Some(signal) => pending.record(signal),
                        None => return SignalsEnd::Closed,
                    },
                }
            }

            // Gather the rest of the burst
            let deadline = Instant::now() + window;
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.changed() => return SignalsEnd::Stopped,
                    _ = tokio::time::sleep_until(deadline) => break,
                    signal = rx.recv() => match signal {
                        Some(signal) => pending.record(signal),
                        None => break,
                    },
                }
            }
            if self.stopping() {
                return SignalsEnd::Stopped;
            }

            match self.native_cycle(pending.take()).await {
                Ok(retry) => {
                    pending.retry(retry);
                    self.finish_cycle();
                }
                Err(WatchError::DirectoryRemoved(_)) => {
                    self.directory_removed();
                    return SignalsEnd::Removed;
                }
                Err(e) => {
                    warn!(dir = %self.monitor.path.display(), error = %e, "Native cycle failed, rescanning");
                    pending.record(RawSignal::Rescan);
                }
            }
        }
    }

    fn finish_cycle(&self) {
        self.monitor.cycles.fetch_add(1, Ordering::AcqRel);
    }

    async fn scan(&self) -> Result<ScanResult> {
        let store = self.store.clone();
        let dir = self.monitor.path.clone();
        let policy = self.policy;
        let unsettled = self.snapshot.unsettled();
        let result = blocking(move || reconcile::scan_directory(store.as_ref(), &dir, &policy, &unsettled)).await?;
        result.map_err(|e| classify(&self.monitor.path, e))
    }

    /// Enumerate, diff, update the snapshot, dispatch
    async fn full_cycle(&mut self) -> Result<()> {
        let scan = self.scan().await?;
        let changes = self.snapshot.apply_scan(&scan);
        self.emit(changes);
        Ok(())
    }

    /// Probe the names gathered during one window; returns names to retry
    async fn native_cycle(&mut self, batch: PendingBatch) -> Result<Vec<String>> {
        if batch.directory_touched {
            let store = self.store.clone();
            let dir = self.monitor.path.clone();
            if !blocking(move || store.is_directory(&dir)).await? {
                return Err(WatchError::DirectoryRemoved(self.monitor.path.clone()));
            }
        }

        if batch.rescan {
            self.emit_directory_wide(ChangeKind::OverflowUnknown);
            self.full_cycle().await?;
            return Ok(Vec::new());
        }

        if batch.names.is_empty() {
            return Ok(Vec::new());
        }

        let store = self.store.clone();
        let dir = self.monitor.path.clone();
        let policy = self.policy;
        let names = batch.names;
        let previous: HashMap<String, Fingerprint> = names
            .iter()
            .filter_map(|name| self.snapshot.get(name).map(|f| (name.clone(), *f)))
            .collect();
        let probes = blocking(move || {
            names
                .into_iter()
                .map(|name| {
                    let probe = reconcile::probe_entry(store.as_ref(), &dir, &name, &policy, previous.get(&name));
                    (name, probe)
                })
                .collect::<Vec<_>>()
        })
        .await?;

        let mut changes = Vec::new();
        let mut retry = Vec::new();
        for (name, probe) in probes {
            match probe.as_option() {
                Some(current) => {
                    if let Some(kind) = self.snapshot.apply_entry(&name, current) {
                        changes.push(Change { name, kind });
                    }
                }
                None => {
                    if let Probe::Skipped = probe {
                        retry.push(name);
                    }
                }
            }
        }

        self.emit(changes);
        Ok(retry)
    }

    fn emit(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }

        let subscriptions = self.monitor.registry.snapshot();
        for change in changes {
            let event = FileChangeEvent::new(self.monitor.path.clone(), change.name, change.kind);
            let delivered = self.dispatcher.dispatch(&subscriptions, &event);
            debug!(event = %event, delivered, "Detected change");
        }
    }

    fn emit_directory_wide(&self, kind: ChangeKind) {
        let event = FileChangeEvent::directory_wide(self.monitor.path.clone(), kind);
        let delivered = self
            .dispatcher
            .dispatch(&self.monitor.registry.snapshot(), &event);
        info!(event = %event, delivered, "Directory-wide event");
    }

    /// Terminal path: unpublish, notify once, stop
    fn directory_removed(&self) {
        let id = self.monitor.id;

        // Unpublish first; after this no registration can reach this monitor
        if let Some(monitors) = self.monitors.upgrade() {
            monitors.remove_if(&self.monitor.path, |_, m| m.id == id);
        }
        self.monitor.stop();

        let subscriptions = self.monitor.registry.drain();
        let event = FileChangeEvent::directory_wide(self.monitor.path.clone(), ChangeKind::DirectoryRemoved);
        let delivered = self.dispatcher.dispatch(&subscriptions, &event);

        info!(
            dir = %self.monitor.path.display(),
            watchers = subscriptions.len(),
            delivered,
            "Watched directory removed, monitor stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FileWatcher, FnWatcher};
    use dirwatch_core::LocalFileStore;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    type Seen = Arc<Mutex<Vec<(ChangeKind, String)>>>;

    fn context() -> MonitorContext {
        MonitorContext {
            store: Arc::new(LocalFileStore::new()),
            config: WatchConfig::default(),
            dispatcher: Dispatcher::new(Handle::current()),
            runtime: Handle::current(),
        }
    }

    /// A native-style detector on `dir` with one catch-all watcher registered
    fn detector(dir: &Path) -> (Detector, Arc<DirectoryMonitor>, Seen) {
        let context = context();
        let policy = context.config.fingerprint_policy();
        let baseline = reconcile::scan_directory(context.store.as_ref(), dir, &policy, &HashMap::new()).unwrap();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let monitor = Arc::new(DirectoryMonitor {
            id: 1,
            path: dir.to_path_buf(),
            backend: Backend::Native,
            registry: WatcherRegistry::new(),
            shutdown,
            cycles: AtomicU64::new(0),
        });

        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let watcher: Arc<dyn FileWatcher> = Arc::new(FnWatcher::new(
            |_: &str| true,
            move |event: &FileChangeEvent| {
                log.lock().push((event.kind(), event.file_name().to_string()));
                Ok(())
            },
        ));
        monitor.registry().add(context.dispatcher.subscribe(watcher));

        let detector = Detector {
            monitor: monitor.clone(),
            store: context.store.clone(),
            policy,
            dispatcher: context.dispatcher.clone(),
            snapshot: Snapshot::from_scan(baseline),
            shutdown: shutdown_rx,
            monitors: Weak::new(),
        };
        (detector, monitor, seen)
    }

    async fn wait_for(seen: &Seen, count: usize) {
        for _ in 0..200 {
            if seen.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overflow_reported_before_rescan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().canonicalize().unwrap();
        let (mut detector, monitor, seen) = detector(&path);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { detector.run_signals(rx, Duration::from_millis(10)).await });

        // Written without a per-path notification; only the rescan can find it
        std::fs::write(path.join("missed"), b"x").unwrap();
        tx.send(RawSignal::Rescan).unwrap();

        wait_for(&seen, 2).await;
        assert_eq!(
            seen.lock().clone(),
            vec![
                (ChangeKind::OverflowUnknown, String::new()),
                (ChangeKind::Created, "missed".to_string()),
            ]
        );

        monitor.stop();
        assert_eq!(task.await.unwrap(), SignalsEnd::Stopped);
        assert!(monitor.cycles() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_directory_removal_ends_signal_loop() {
        let root = TempDir::new().unwrap();
        let path = root.path().canonicalize().unwrap().join("watched");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("f"), b"x").unwrap();
        let (mut detector, monitor, seen) = detector(&path);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move { detector.run_signals(rx, Duration::from_millis(10)).await });

        std::fs::remove_dir_all(&path).unwrap();
        tx.send(RawSignal::Paths(vec![path.join("f"), path.clone()])).unwrap();

        assert_eq!(task.await.unwrap(), SignalsEnd::Removed);
        wait_for(&seen, 1).await;
        assert_eq!(seen.lock().clone(), vec![(ChangeKind::DirectoryRemoved, String::new())]);
        assert!(!monitor.is_running());
        assert!(monitor.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_channel_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().canonicalize().unwrap();
        let (mut detector, monitor, _seen) = detector(&path);

        let (tx, rx) = mpsc::unbounded_channel::<RawSignal>();
        drop(tx);

        assert_eq!(detector.run_signals(rx, Duration::from_millis(10)).await, SignalsEnd::Closed);
        assert!(monitor.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().canonicalize().unwrap();
        let context = context();
        let monitors = Arc::new(MonitorMap::new());

        let monitor = DirectoryMonitor::start(7, path.clone(), &context, Arc::downgrade(&monitors)).unwrap();
        assert_eq!(monitor.id(), 7);
        assert_eq!(monitor.path(), path.as_path());
        assert_eq!(monitor.backend(), Backend::Poll);
        assert!(monitor.is_running());

        monitor.stop();
        assert!(!monitor.is_running());

        let missing = DirectoryMonitor::start(8, path.join("missing"), &context, Arc::downgrade(&monitors));
        assert!(matches!(missing, Err(WatchError::DirectoryRemoved(_))));
    }
}
