//! Sync orchestrator
//!
//! Owns the engine lifecycle and drives two reconciliation paths over the
//! same per-item dispatch:
//!
//! - **Event-driven**: settled watcher events map 1:1 onto item updates.
//! - **Periodic**: every `periodic_interval_secs` a full pass (a) rescans
//!   the sync root, (b) propagates local deletions, (c) pulls the remote
//!   change feed since the persisted cursor, (d) retries pending and
//!   errored items.
//!
//! Per-item work runs in spawned tasks bounded by a semaphore; task ids
//! live in their own set so `stop_sync` can drain in-flight transfers
//! before reporting `Idle`. Transfers go through
//! [`with_retry`](nimbus_core::retry::with_retry) and a final failure
//! marks the item `Error` without stopping the loops.
//!
//! Selective sync: remote items outside the configured selected folders
//! are tracked as cloud-only records but never downloaded. Each start
//! diffs the configured set against the one the previous run persisted
//! and removes or releases local replicas accordingly.
//!
//! Every transfer first takes a lease from the
//! [`BandwidthAllocator`]; a zero grant (offline, metered, paused,
//! outside a sync window) defers the item to a later pass. A network
//! monitor feeds status changes into the allocator and, while the
//! remote side is unreachable, deletions and moves land in the
//! [`OfflineQueue`] journal. On reconnect the cache is validated and
//! the journal replays before the next reconciliation pass.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use nimbus_bandwidth::BandwidthAllocator;
use nimbus_conflict::{ConflictDetector, ConflictResolver, StrategyPolicy};
use nimbus_core::config::Config;
use nimbus_core::domain::{
    ChangeCursor, ContentHash, ItemId, ItemKind, LocalPath, ModificationKind, OfflineCacheItem,
    OfflineModification, RemotePath, SyncError, SyncItem, SyncState, TransferDirection,
    TransferPriority, VersionInfo,
};
use nimbus_core::ports::{
    FileSystemState, ICloudTransport, ILocalFileSystem, IMetadataStore, INetworkMonitor,
    NetworkStatus, ProgressFn, RemoteChange, RemoteItem,
};
use nimbus_core::retry::{with_retry, TRANSFER_BACKOFF_CAP_SECS};
use nimbus_offline::{OfflineCache, OfflineQueue};

use crate::scheduler::{ChangeScheduler, ExcludeFilter};
use crate::state::{EngineState, EngineStatus};
use crate::watcher::{ChangeEvent, RootWatcher};

/// Quiet interval for the pre-upload stability probe
const STABILITY_CHECK_MS: u64 = 200;

/// How often the scheduler polls its debounce queue
const SCHEDULER_POLL_MS: u64 = 250;

/// Bounded drain: how long `stop_sync` waits for in-flight tasks
const DRAIN_POLL_MS: u64 = 50;
const DRAIN_MAX_POLLS: u32 = 200;

fn noop_progress() -> ProgressFn {
    Box::new(|_, _| {})
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// The engine's coordination hub; hosts hold it in an `Arc`
pub struct SyncOrchestrator {
    config: Config,
    sync_root: LocalPath,
    store: Arc<dyn IMetadataStore>,
    transport: Arc<dyn ICloudTransport>,
    filesystem: Arc<dyn ILocalFileSystem>,
    detector: ConflictDetector,
    policy: StrategyPolicy,
    resolver: ConflictResolver,
    status: Arc<EngineStatus>,
    filter: ExcludeFilter,
    /// Remote folders materialized locally; empty means the whole tree
    selection: Vec<RemotePath>,
    transfer_permits: Arc<Semaphore>,
    allocator: Arc<BandwidthAllocator>,
    offline_queue: Arc<OfflineQueue>,
    offline_cache: Arc<OfflineCache>,
    monitor: Arc<dyn INetworkMonitor>,
    /// Ids of items with an in-flight task; its own lock so dispatch and
    /// drain never contend with the state lock
    active_items: Arc<StdMutex<HashSet<ItemId>>>,
    paused: AtomicBool,
    cancel: StdMutex<CancellationToken>,
    watcher: StdMutex<Option<RootWatcher>>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Builds the orchestrator from configuration and injected adapters
    ///
    /// # Errors
    /// Fails on an invalid sync root, exclude pattern, selected folder,
    /// or conflict rule.
    pub fn new(
        config: Config,
        store: Arc<dyn IMetadataStore>,
        transport: Arc<dyn ICloudTransport>,
        filesystem: Arc<dyn ILocalFileSystem>,
        monitor: Arc<dyn INetworkMonitor>,
    ) -> Result<Self> {
        let sync_root = LocalPath::new(config.sync.root.clone())
            .context("sync.root is not a usable absolute path")?;
        let filter = ExcludeFilter::new(&config.sync.exclude_patterns)?;
        let mut selection = config
            .sync
            .selected_folders
            .iter()
            .map(|f| RemotePath::new(f.clone()))
            .collect::<Result<Vec<_>, _>>()
            .context("sync.selected_folders contains an invalid remote path")?;
        selection.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        selection.dedup();
        let policy = StrategyPolicy::from_config(&config.conflicts)?;
        let resolver =
            ConflictResolver::new(store.clone(), transport.clone(), filesystem.clone());
        let transfer_permits = Arc::new(Semaphore::new(config.sync.max_concurrent_transfers));
        let allocator = Arc::new(BandwidthAllocator::new(config.bandwidth.clone()));
        let offline_queue = Arc::new(OfflineQueue::new(
            sync_root.clone(),
            transport.clone(),
            filesystem.clone(),
            config.offline.retry_horizon_hours,
        ));
        let cache_dir = LocalPath::new(config.cache_dir())
            .context("offline cache directory is not a usable absolute path")?;
        let offline_cache = Arc::new(OfflineCache::new(
            cache_dir,
            config.offline.cache_capacity_bytes,
            transport.clone(),
            filesystem.clone(),
        ));

        Ok(Self {
            config,
            sync_root,
            store,
            transport,
            filesystem,
            detector: ConflictDetector::new(),
            policy,
            resolver,
            status: Arc::new(EngineStatus::new()),
            filter,
            selection,
            transfer_permits,
            allocator,
            offline_queue,
            offline_cache,
            monitor,
            active_items: Arc::new(StdMutex::new(HashSet::new())),
            paused: AtomicBool::new(false),
            cancel: StdMutex::new(CancellationToken::new()),
            watcher: StdMutex::new(None),
            loop_handles: Mutex::new(Vec::new()),
        })
    }

    /// Shared status view: state, progress, notifications
    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the watcher, the scheduler, and both reconciliation loops
    ///
    /// # Errors
    /// `SyncError::InvalidConfiguration` if already running;
    /// `SyncError::DatabaseUnavailable` if the store cannot be reached;
    /// watcher errors if the sync root cannot be observed.
    pub async fn start_sync(self: &Arc<Self>) -> Result<()> {
        if self.status.state().await.is_running() {
            return Err(SyncError::InvalidConfiguration(
                "sync engine is already running".to_string(),
            )
            .into());
        }

        // The store must answer before anything else starts; unavailability
        // here is fatal, not a skippable item failure.
        self.store
            .load_change_cursor()
            .await
            .context("metadata store not reachable")?;

        self.filesystem
            .create_directory(&self.sync_root)
            .await
            .context("sync root cannot be created")?;

        self.apply_selection_changes()
            .await
            .context("selected-folder reconciliation failed")?;

        // Seed the allocator and the offline queue with the current
        // network condition; the network loop takes over from here
        let network = self.monitor.current().await;
        self.allocator.handle_network_change(network);
        self.offline_queue.set_online(network.reachable);

        let (mut watcher, raw_rx) = RootWatcher::new()?;
        watcher.watch(self.sync_root.as_path())?;
        *self.watcher.lock().expect("watcher lock poisoned") = Some(watcher);

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = cancel.clone();
        self.paused.store(false, Ordering::Release);

        let (mut scheduler, settled_rx) = ChangeScheduler::new(
            raw_rx,
            self.filter.clone(),
            Duration::from_millis(self.config.sync.debounce_ms),
            Duration::from_millis(SCHEDULER_POLL_MS),
        );

        let scheduler_cancel = cancel.clone();
        let scheduler_handle = tokio::spawn(async move {
            tokio::select! {
                _ = scheduler.run() => {}
                _ = scheduler_cancel.cancelled() => {}
            }
        });

        let event_handle = tokio::spawn({
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            async move { orchestrator.event_loop(settled_rx, cancel).await }
        });

        let periodic_handle = tokio::spawn({
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            async move { orchestrator.periodic_loop(cancel).await }
        });

        let network_handle = tokio::spawn({
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            async move { orchestrator.network_loop(cancel).await }
        });

        {
            let mut handles = self.loop_handles.lock().await;
            handles.push(scheduler_handle);
            handles.push(event_handle);
            handles.push(periodic_handle);
            handles.push(network_handle);
        }

        self.status.set_state(EngineState::Syncing).await;
        info!(root = %self.sync_root, "Sync engine started");
        Ok(())
    }

    /// Stops the timer but keeps the watcher; events accumulate
    pub async fn pause_sync(&self) {
        self.paused.store(true, Ordering::Release);
        self.allocator.pause();
        self.status.set_state(EngineState::Paused).await;
        info!("Sync engine paused");
    }

    /// Resumes reconciliation; a no-op progress refresh while Syncing
    pub async fn resume_sync(&self) {
        self.paused.store(false, Ordering::Release);
        self.allocator.resume();
        self.status.set_state(EngineState::Syncing).await;
        info!("Sync engine resumed");
    }

    /// Detaches the watcher, drains in-flight item tasks, reports Idle
    pub async fn stop_sync(&self) {
        self.cancel
            .lock()
            .expect("cancel lock poisoned")
            .cancel();

        if let Some(mut watcher) = self.watcher.lock().expect("watcher lock poisoned").take() {
            if let Err(e) = watcher.unwatch() {
                warn!(error = %e, "Failed to unwatch sync root");
            }
        }

        // Bounded drain: in-flight transfers get a grace period, then we
        // report Idle anyway and let the tasks finish detached.
        for _ in 0..DRAIN_MAX_POLLS {
            if self
                .active_items
                .lock()
                .expect("active set lock poisoned")
                .is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(DRAIN_POLL_MS)).await;
        }

        let handles: Vec<JoinHandle<()>> = self.loop_handles.lock().await.drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
                debug!("Loop task did not finish within the drain window");
            }
        }

        self.paused.store(false, Ordering::Release);
        self.status.set_state(EngineState::Idle).await;
        info!("Sync engine stopped");
    }

    /// Runs exactly one reconciliation pass (daemon `--once` mode)
    pub async fn run_once(self: &Arc<Self>) -> Result<()> {
        let network = self.monitor.current().await;
        self.allocator.handle_network_change(network);
        self.offline_queue.set_online(network.reachable);
        self.apply_selection_changes().await?;

        self.status.set_state(EngineState::Syncing).await;
        let result = self.reconciliation_pass().await;
        self.drain_active().await;
        self.status.set_state(EngineState::Idle).await;
        result
    }

    async fn drain_active(&self) {
        for _ in 0..DRAIN_MAX_POLLS {
            if self
                .active_items
                .lock()
                .expect("active set lock poisoned")
                .is_empty()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(DRAIN_POLL_MS)).await;
        }
    }

    // ========================================================================
    // Loops
    // ========================================================================

    async fn event_loop(
        self: Arc<Self>,
        mut settled_rx: tokio::sync::mpsc::Receiver<ChangeEvent>,
        cancel: CancellationToken,
    ) {
        // Events arriving while paused are parked here and replayed on
        // resume, so pausing never loses observed changes
        let mut parked: Vec<ChangeEvent> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = settled_rx.recv() => {
                    let Some(event) = event else { break };
                    if self.paused.load(Ordering::Acquire) {
                        parked.push(event);
                        continue;
                    }
                    for queued in parked.drain(..) {
                        self.handle_change_event(queued).await;
                    }
                    self.handle_change_event(event).await;
                }
            }
        }
        debug!("Event loop stopped");
    }

    async fn periodic_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut timer =
            tokio::time::interval(Duration::from_secs(self.config.sync.periodic_interval_secs));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    if self.paused.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Err(e) = self.reconciliation_pass().await {
                        if is_fatal(&e) {
                            self.fail_engine(e).await;
                            break;
                        }
                        warn!(error = %format!("{e:#}"), "Reconciliation pass failed");
                    }
                }
            }
        }
        debug!("Periodic loop stopped");
    }

    async fn network_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut status_rx = self.monitor.subscribe().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                status = status_rx.recv() => {
                    let Some(status) = status else { break };
                    self.apply_network_status(status).await;
                }
            }
        }
        debug!("Network loop stopped");
    }

    /// Feeds one observed network condition into the allocator and the
    /// offline machinery
    pub async fn apply_network_status(self: &Arc<Self>, status: NetworkStatus) {
        let was_online = self.offline_queue.is_online();
        self.allocator.handle_network_change(status);
        if status.reachable && !was_online {
            self.handle_reconnect().await;
        } else if !status.reachable {
            self.offline_queue.set_online(false);
        }
    }

    /// Reachable again: validate the cache, replay the journal, then run
    /// a full pass to pick up whatever happened while offline
    async fn handle_reconnect(self: &Arc<Self>) {
        info!("Connectivity restored");
        if let Err(e) = self.offline_cache.validate_cache_integrity().await {
            warn!(error = %format!("{e:#}"), "Cache validation failed on reconnect");
        }
        let report = self.offline_queue.replay().await;
        if report.replayed + report.kept + report.dropped > 0 {
            info!(
                replayed = report.replayed,
                kept = report.kept,
                dropped = report.dropped,
                "Offline journal replay finished"
            );
        }
        self.offline_queue.set_online(true);
        if let Err(e) = self.reconciliation_pass().await {
            if is_fatal(&e) {
                self.fail_engine(e).await;
            } else {
                warn!(error = %format!("{e:#}"), "Post-reconnect pass failed");
            }
        }
    }

    /// Records an engine-level failure; per-item failures never land here
    async fn fail_engine(&self, err: anyhow::Error) {
        error!(error = %format!("{err:#}"), "Engine-level failure");
        self.status
            .set_state(EngineState::Error(format!("{err:#}")))
            .await;
    }

    // ========================================================================
    // Periodic reconciliation
    // ========================================================================

    /// One full pass: local scan, deletion sweep, remote pull, retries
    ///
    /// The scan only records state; dispatch happens in the retry step
    /// AFTER the remote feed has been applied, so an item that changed on
    /// both sides is flagged as a conflict instead of being blindly
    /// re-uploaded over the remote edit.
    #[instrument(skip(self))]
    async fn reconciliation_pass(self: &Arc<Self>) -> Result<()> {
        self.scan_local_tree(&self.sync_root.clone()).await?;
        self.sweep_vanished_local().await?;
        self.pull_remote_changes().await?;
        self.retry_pending().await?;
        // Cache upkeep rides on the pass; a full cache must not stop it
        if let Err(e) = self
            .offline_cache
            .cleanup_cache(self.config.offline.cleanup_threshold)
            .await
        {
            warn!(error = %format!("{e:#}"), "Offline cache cleanup failed");
        }
        Ok(())
    }

    /// Walks the sync root and registers unknown or changed local entries
    ///
    /// One unreadable entry is skipped with a warning so the rest of the
    /// tree still gets scanned.
    fn scan_local_tree<'a>(
        self: &'a Arc<Self>,
        dir: &'a LocalPath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self
                .filesystem
                .list_directory(dir)
                .await
                .with_context(|| format!("scan {dir}"))?;

            for entry in entries {
                if self.filter.is_excluded(entry.as_path()) {
                    continue;
                }
                if let Err(e) = self.scan_entry(&entry).await {
                    if is_fatal(&e) {
                        return Err(e);
                    }
                    warn!(path = %entry, error = %format!("{e:#}"), "Skipping unreadable entry");
                }
            }
            Ok(())
        })
    }

    /// Registers one scanned path, recursing into directories
    async fn scan_entry(self: &Arc<Self>, entry: &LocalPath) -> Result<()> {
        let state = self.filesystem.get_state(entry).await?;
        let known = self.store.get_by_local_path(entry).await?;

        match (state.is_directory(), known) {
            (true, None) => {
                self.register_local_entry(entry, ItemKind::Folder).await?;
                self.scan_local_tree(entry).await?;
            }
            (true, Some(_)) => {
                self.scan_local_tree(entry).await?;
            }
            (false, None) if state.is_regular_file() => {
                self.register_local_entry(entry, ItemKind::File).await?;
            }
            (false, Some(item)) if state.is_regular_file() => {
                if item.state() == SyncState::Synced {
                    self.refresh_if_locally_changed(item, entry).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Creates a LocalOnly item for a newly seen path
    ///
    /// Returns the registered item; dispatching it is the caller's call.
    /// Event-driven callers sync it immediately, the periodic scan leaves
    /// it sitting for the retry step after the remote feed has applied.
    async fn register_local_entry(
        self: &Arc<Self>,
        local: &LocalPath,
        kind: ItemKind,
    ) -> Result<SyncItem> {
        let remote = self.to_remote(local)?;
        let state = self.filesystem.get_state(local).await?;
        let hash = match kind {
            ItemKind::File => Some(self.filesystem.compute_hash(local).await?),
            ItemKind::Folder => None,
        };

        let mut item = SyncItem::new_local(
            local.clone(),
            remote,
            kind,
            state.size,
            state.modified.unwrap_or_else(chrono::Utc::now),
            hash,
        );
        item.set_selected(self.is_path_selected(item.remote_path()));
        item.set_parent_id(self.parent_item_id(local).await?);

        debug!(path = %local, kind = %kind, "Registering new local entry");
        self.store.insert(&item).await?;
        self.status
            .notify(item.id(), item.remote_path().clone(), item.state());
        Ok(item)
    }

    /// Moves a Synced item back to LocalOnly when its content diverged
    ///
    /// Returns the demoted item, or `None` if the content is unchanged.
    /// Dispatch is left to the caller, same as [`Self::register_local_entry`].
    async fn refresh_if_locally_changed(
        self: &Arc<Self>,
        mut item: SyncItem,
        local: &LocalPath,
    ) -> Result<Option<SyncItem>> {
        let hash = self.filesystem.compute_hash(local).await?;
        if item.hash() == Some(&hash) {
            return Ok(None);
        }
        let state = self.filesystem.get_state(local).await?;
        item.update_content(
            state.size,
            state.modified.unwrap_or_else(chrono::Utc::now),
            Some(hash),
        );
        item.transition_to(SyncState::LocalOnly)?;
        self.store.update(&item).await?;
        Ok(Some(item))
    }

    /// Propagates local deletions: store rows whose file vanished
    async fn sweep_vanished_local(self: &Arc<Self>) -> Result<()> {
        for item in self.store.list_all().await? {
            // CloudOnly items have no local replica yet; held states are
            // mid-transfer or intentionally parked
            if item.state() == SyncState::CloudOnly || item.state().is_held() {
                continue;
            }
            let state = self.filesystem.get_state(item.local_path()).await?;
            if state.exists {
                continue;
            }
            debug!(path = %item.local_path(), "Local file vanished, propagating deletion");
            self.propagate_local_delete(&item).await?;
            self.store.delete(item.id()).await?;
            self.status
                .notify(item.id(), item.remote_path().clone(), item.state());
            self.status
                .update_progress(|p| p.files_deleted += 1)
                .await;
        }
        Ok(())
    }

    /// Pulls and applies the remote change feed since the stored cursor
    async fn pull_remote_changes(self: &Arc<Self>) -> Result<()> {
        let cursor = match self.store.load_change_cursor().await? {
            Some(raw) => Some(ChangeCursor::new(raw)?),
            None => None,
        };

        let change_set = with_retry(
            "get_changes",
            self.config.sync.max_retry_attempts,
            TRANSFER_BACKOFF_CAP_SECS,
            || async { self.transport.get_changes(cursor.as_ref()).await },
        )
        .await;

        let change_set = match change_set {
            Ok(cs) => cs,
            Err(e) if nimbus_core::retry::is_retryable_error(&e) => {
                // Offline or flapping: keep the cursor, try again next pass
                debug!(error = %e, "Change feed unavailable, will retry next pass");
                return Ok(());
            }
            Err(e) => return Err(e.context("remote change feed failed")),
        };

        for change in &change_set.changes {
            if let Err(e) = self.apply_remote_change(change).await {
                if is_fatal(&e) {
                    return Err(e);
                }
                warn!(
                    remote = %change.item.path,
                    error = %format!("{e:#}"),
                    "Failed to apply remote change, continuing"
                );
            }
        }

        self.store
            .save_change_cursor(change_set.next_cursor.as_str())
            .await?;
        Ok(())
    }

    /// Applies one remote change to the store and filesystem
    async fn apply_remote_change(self: &Arc<Self>, change: &RemoteChange) -> Result<()> {
        let remote = &change.item;
        let known = self.store.get_by_remote_path(&remote.path).await?;

        if change.deleted {
            let Some(item) = known else { return Ok(()) };
            debug!(remote = %remote.path, "Remote deleted, removing local replica");
            let state = self.filesystem.get_state(item.local_path()).await?;
            if state.is_directory() {
                self.filesystem.delete_directory(item.local_path()).await?;
            } else if state.exists {
                self.filesystem.delete_file(item.local_path()).await?;
            }
            self.store.delete(item.id()).await?;
            self.status
                .notify(item.id(), remote.path.clone(), item.state());
            self.status
                .update_progress(|p| p.files_deleted += 1)
                .await;
            return Ok(());
        }

        match known {
            None => {
                let local = self.to_local(&remote.path)?;
                if self.filter.is_excluded(local.as_path()) {
                    return Ok(());
                }
                let mut item = SyncItem::new_remote(
                    local.clone(),
                    remote.path.clone(),
                    remote.kind,
                    remote.size_bytes,
                    remote.modified_at,
                    remote.hash.clone(),
                );
                item.set_selected(self.is_path_selected(item.remote_path()));
                item.set_parent_id(self.parent_item_id(&local).await?);
                self.store.insert(&item).await?;
                self.status
                    .notify(item.id(), item.remote_path().clone(), item.state());
                // Unselected items stay tracked as cloud-only records
                if item.is_selected() {
                    self.dispatch(item);
                }
            }
            Some(item) if item.state() == SyncState::Synced => {
                self.reconcile_synced_against_remote(item, remote).await?;
            }
            Some(item) if item.state() == SyncState::LocalOnly => {
                self.reconcile_pending_local_against_remote(item, remote)
                    .await?;
            }
            Some(mut item) if item.state() == SyncState::CloudOnly => {
                item.update_content(remote.size_bytes, remote.modified_at, remote.hash.clone());
                self.store.update(&item).await?;
                if item.is_selected() {
                    self.dispatch(item);
                }
            }
            Some(item) => {
                debug!(
                    remote = %remote.path,
                    state = %item.state(),
                    "Remote change deferred, item busy"
                );
            }
        }
        Ok(())
    }

    /// A Synced item whose remote side changed: download, or conflict if
    /// the local side changed too
    async fn reconcile_synced_against_remote(
        self: &Arc<Self>,
        mut item: SyncItem,
        remote: &RemoteItem,
    ) -> Result<()> {
        let remote_changed = match (&remote.hash, item.hash()) {
            (Some(new), Some(stored)) => new != stored,
            (Some(_), None) => true,
            (None, _) => remote.modified_at > item.modified_at(),
        };
        if !remote_changed {
            return Ok(());
        }

        let fs_state = self.filesystem.get_state(item.local_path()).await?;
        let local_hash = if fs_state.is_regular_file() {
            Some(self.filesystem.compute_hash(item.local_path()).await?)
        } else {
            None
        };
        let local_changed =
            item.kind() == ItemKind::File && local_hash.as_ref() != item.hash();

        if local_changed {
            let (local_version, remote_version) =
                replica_versions(&item, &fs_state, local_hash, remote);
            if let Some(conflict) = self.detector.detect(&local_version, &remote_version) {
                info!(path = %item.local_path(), conflict_type = %conflict.conflict_type, "Both sides changed");
                item.mark_conflicted(conflict)?;
                self.store.update(&item).await?;
                self.status
                    .notify(item.id(), item.remote_path().clone(), item.state());
                self.status
                    .update_progress(|p| p.conflicts_detected += 1)
                    .await;
                self.dispatch(item);
            }
            return Ok(());
        }

        item.update_content(remote.size_bytes, remote.modified_at, remote.hash.clone());
        item.transition_to(SyncState::CloudOnly)?;
        self.store.update(&item).await?;
        if item.is_selected() {
            self.dispatch(item);
        }
        Ok(())
    }

    /// A remote change arriving while a local edit is still pending upload:
    /// the both-sides case the scan-then-pull ordering exists to catch
    async fn reconcile_pending_local_against_remote(
        self: &Arc<Self>,
        mut item: SyncItem,
        remote: &RemoteItem,
    ) -> Result<()> {
        let fs_state = self.filesystem.get_state(item.local_path()).await?;
        if !fs_state.exists {
            // The pending local side vanished again; the deletion sweep
            // owns that case
            return Ok(());
        }
        let local_hash = if fs_state.is_regular_file() {
            Some(self.filesystem.compute_hash(item.local_path()).await?)
        } else {
            None
        };
        if item.kind() == ItemKind::File
            && remote.hash.is_some()
            && local_hash == remote.hash
        {
            // Both sides arrived at the same content; the pending upload
            // degenerates to a no-op overwrite
            return Ok(());
        }

        let (local_version, remote_version) =
            replica_versions(&item, &fs_state, local_hash, remote);
        if let Some(conflict) = self.detector.detect(&local_version, &remote_version) {
            info!(path = %item.local_path(), conflict_type = %conflict.conflict_type, "Both sides changed");
            item.mark_conflicted(conflict)?;
            self.store.update(&item).await?;
            self.status
                .notify(item.id(), item.remote_path().clone(), item.state());
            self.status
                .update_progress(|p| p.conflicts_detected += 1)
                .await;
            self.dispatch(item);
        }
        Ok(())
    }

    /// Re-dispatches pending work and revives errored items
    ///
    /// Uploading/Downloading rows are also dispatched: for an item with a
    /// live task the dispatch is dropped by the active-set guard, so only
    /// transfers stranded by a crash reach the recovery path.
    async fn retry_pending(self: &Arc<Self>) -> Result<()> {
        for state in [
            SyncState::LocalOnly,
            SyncState::CloudOnly,
            SyncState::Conflict,
            SyncState::Uploading,
            SyncState::Downloading,
        ] {
            for item in self.store.list_by_state(state).await? {
                // Unselected cloud-only rows would only spawn no-op tasks
                if state == SyncState::CloudOnly && !item.is_selected() {
                    continue;
                }
                self.dispatch(item);
            }
        }

        for mut item in self.store.list_by_state(SyncState::Error).await? {
            let attempts = item.error_info().map(|e| e.retry_count).unwrap_or(0);
            if attempts >= self.config.sync.max_retry_attempts {
                continue;
            }
            let local_exists = self
                .filesystem
                .get_state(item.local_path())
                .await?
                .exists;
            let entry = if local_exists {
                SyncState::LocalOnly
            } else {
                SyncState::CloudOnly
            };
            item.reset_for_retry(entry)?;
            self.store.update(&item).await?;
            self.dispatch(item);
        }
        Ok(())
    }

    // ========================================================================
    // Selective sync
    // ========================================================================

    /// Whether a remote path falls inside the configured selection
    ///
    /// Ancestors of a selected folder count as selected so the directory
    /// chain above it stays materialized.
    fn is_path_selected(&self, remote: &RemotePath) -> bool {
        self.selection.is_empty()
            || self
                .selection
                .iter()
                .any(|folder| remote.is_under(folder) || folder.is_under(remote))
    }

    /// Brings tracked items in line with the configured selected folders
    ///
    /// Runs once per engine start. When the configured set differs from
    /// the one the previous run persisted, every item's selection flag is
    /// recomputed: replicas that fell out of the selection are removed
    /// locally and their records drop back to cloud-only, newly selected
    /// records become eligible for the next pass's downloads. Pending
    /// local edits, parked conflicts, and errored items keep their local
    /// files whatever the selection says.
    async fn apply_selection_changes(self: &Arc<Self>) -> Result<()> {
        let previous = self.store.load_previous_selection().await?;
        if previous == self.selection {
            return Ok(());
        }
        info!(
            folders = self.selection.len(),
            "Selected-folder set changed, reconciling tracked items"
        );

        let mut items = self.store.list_all().await?;
        // Deepest first, so files go before their folder and a deselected
        // folder is empty by the time its own turn comes
        items.sort_by_key(|i| {
            std::cmp::Reverse(i.remote_path().as_str().matches('/').count())
        });

        for mut item in items {
            let selected = self.is_path_selected(item.remote_path());
            let flag_changed = selected != item.is_selected();
            let dematerialize = !selected
                && matches!(item.state(), SyncState::Synced | SyncState::CloudOnly);
            if !flag_changed && !dematerialize {
                continue;
            }

            item.set_selected(selected);
            if dematerialize {
                let was_synced = item.state() == SyncState::Synced;
                if was_synced {
                    item.transition_to(SyncState::CloudOnly)?;
                }
                // Row first: a crash between the two writes must not leave
                // a synced row whose missing replica the deletion sweep
                // would propagate to the remote
                self.store.update(&item).await?;
                self.remove_replica_if_safe(&item).await?;
                if was_synced {
                    debug!(path = %item.local_path(), "Deselected, local replica removed");
                    self.status
                        .notify(item.id(), item.remote_path().clone(), item.state());
                }
            } else {
                self.store.update(&item).await?;
            }
        }

        self.store.save_previous_selection(&self.selection).await?;
        Ok(())
    }

    /// Removes the local replica of a deselected item
    ///
    /// Files are deleted outright; a folder goes only once it is empty,
    /// so anything not safely replicated keeps its directory chain.
    async fn remove_replica_if_safe(&self, item: &SyncItem) -> Result<()> {
        let state = self.filesystem.get_state(item.local_path()).await?;
        if !state.exists {
            return Ok(());
        }
        if state.is_directory() {
            if self
                .filesystem
                .list_directory(item.local_path())
                .await?
                .is_empty()
            {
                self.filesystem.delete_directory(item.local_path()).await?;
            } else {
                debug!(path = %item.local_path(), "Deselected folder still has content, keeping it");
            }
        } else {
            self.filesystem.delete_file(item.local_path()).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Event-driven reconciliation
    // ========================================================================

    /// Maps one settled watcher event onto item work
    async fn handle_change_event(self: &Arc<Self>, event: ChangeEvent) {
        let result = match &event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => {
                self.on_local_upsert(path.clone()).await
            }
            ChangeEvent::Deleted(path) => self.on_local_delete(path.clone()).await,
            ChangeEvent::Renamed { old, new } => {
                self.on_local_rename(old.clone(), new.clone()).await
            }
        };
        if let Err(e) = result {
            if is_fatal(&e) {
                self.fail_engine(e).await;
            } else {
                warn!(
                    event = ?event,
                    error = %format!("{e:#}"),
                    "Failed to process change event"
                );
            }
        }
    }

    async fn on_local_upsert(self: &Arc<Self>, path: std::path::PathBuf) -> Result<()> {
        let local = LocalPath::new(path)?;
        let state = self.filesystem.get_state(&local).await?;
        if !state.exists {
            // Created-then-deleted within the debounce window
            return Ok(());
        }

        match self.store.get_by_local_path(&local).await? {
            None => {
                let kind = if state.is_directory() {
                    ItemKind::Folder
                } else {
                    ItemKind::File
                };
                let item = self.register_local_entry(&local, kind).await?;
                self.dispatch(item);
                Ok(())
            }
            Some(item) if item.state() == SyncState::Synced && item.kind() == ItemKind::File => {
                if let Some(demoted) = self.refresh_if_locally_changed(item, &local).await? {
                    self.dispatch(demoted);
                }
                Ok(())
            }
            Some(item) if !item.state().is_held() => {
                self.dispatch(item);
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    async fn on_local_delete(self: &Arc<Self>, path: std::path::PathBuf) -> Result<()> {
        let local = LocalPath::new(path)?;
        let Some(item) = self.store.get_by_local_path(&local).await? else {
            return Ok(());
        };
        if self.filesystem.get_state(&local).await?.exists {
            // Recreated before the event settled
            return Ok(());
        }

        debug!(path = %local, "Local deletion observed");
        self.propagate_local_delete(&item).await?;
        self.store.delete(item.id()).await?;
        self.status
            .notify(item.id(), item.remote_path().clone(), item.state());
        self.status
            .update_progress(|p| p.files_deleted += 1)
            .await;
        Ok(())
    }

    async fn on_local_rename(
        self: &Arc<Self>,
        old: std::path::PathBuf,
        new: std::path::PathBuf,
    ) -> Result<()> {
        let old_local = LocalPath::new(old)?;
        let new_local = LocalPath::new(new.clone())?;

        let Some(mut item) = self.store.get_by_local_path(&old_local).await? else {
            // Rename from an untracked path reduces to a creation
            return self.on_local_upsert(new).await;
        };

        let new_remote = self.to_remote(&new_local)?;
        let old_remote = item.remote_path().clone();

        let moved = with_retry(
            "move_item",
            self.config.sync.max_retry_attempts,
            TRANSFER_BACKOFF_CAP_SECS,
            || async { self.transport.move_item(&old_remote, &new_remote).await },
        )
        .await;

        match moved {
            Ok(()) => {}
            Err(e) if nimbus_core::retry::is_retryable_error(&e) => {
                // The local rename already happened; journal the remote
                // side and let the reconnect replay catch it up
                debug!(old = %old_local, new = %new_local, "Remote unreachable, journaling move");
                self.offline_queue.set_online(false);
                self.offline_queue
                    .record(OfflineModification::new(
                        new_local.clone(),
                        ModificationKind::Moved {
                            old_path: old_local.clone(),
                        },
                    ))
                    .await?;
            }
            Err(e) => {
                return Err(e.context(format!("move {old_remote} to {new_remote}")));
            }
        }

        item.relocate(new_local, new_remote);
        item.set_parent_id(self.parent_item_id(item.local_path()).await?);
        self.store.update(&item).await?;
        self.status
            .notify(item.id(), item.remote_path().clone(), item.state());
        Ok(())
    }

    // ========================================================================
    // Per-item dispatch
    // ========================================================================

    /// Spawns a bounded task for one item; a second dispatch for the same
    /// id while the first is in flight is dropped
    fn dispatch(self: &Arc<Self>, item: SyncItem) {
        {
            let mut active = self.active_items.lock().expect("active set lock poisoned");
            if !active.insert(item.id()) {
                return;
            }
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let _permit = orchestrator
                .transfer_permits
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");

            let id = item.id();
            if let Err(e) = orchestrator.perform_sync_for_item(item).await {
                if is_fatal(&e) {
                    orchestrator.fail_engine(e).await;
                } else {
                    warn!(item_id = %id, error = %format!("{e:#}"), "Item task failed");
                }
            }

            orchestrator
                .active_items
                .lock()
                .expect("active set lock poisoned")
                .remove(&id);
        });
    }

    /// State-directed dispatch for one item
    #[instrument(skip(self, item), fields(item_id = %item.id(), path = %item.local_path(), state = %item.state()))]
    async fn perform_sync_for_item(self: &Arc<Self>, item: SyncItem) -> Result<()> {
        match item.state() {
            SyncState::LocalOnly => self.upload_item(item).await,
            SyncState::CloudOnly if !item.is_selected() => {
                // Tracked but not materialized; stays a cloud-only record
                Ok(())
            }
            SyncState::CloudOnly => self.download_item(item).await,
            SyncState::Conflict => self.auto_resolve(item).await,
            SyncState::Synced => self.recheck_synced(item).await,
            SyncState::Uploading | SyncState::Downloading => {
                self.recover_interrupted(item).await
            }
            SyncState::Error | SyncState::Paused => Ok(()),
        }
    }

    /// Whether a file's size is constant across a short interval
    ///
    /// Guards against uploading a file another process is still writing
    /// (an in-progress download, a large copy). A vanished file is
    /// reported unstable.
    async fn is_stable(&self, path: &LocalPath) -> Result<bool> {
        let first = self.filesystem.get_state(path).await?;
        if !first.is_regular_file() {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(STABILITY_CHECK_MS)).await;
        let second = self.filesystem.get_state(path).await?;
        Ok(second.is_regular_file() && first.size == second.size)
    }

    /// Uploads one LocalOnly item and marks it Synced
    async fn upload_item(self: &Arc<Self>, mut item: SyncItem) -> Result<()> {
        if item.kind() == ItemKind::File && !self.is_stable(item.local_path()).await? {
            debug!(path = %item.local_path(), "File still changing, upload deferred");
            return Ok(());
        }

        let lease = self
            .allocator
            .lease(TransferDirection::Upload, TransferPriority::Normal);
        if lease.granted_bps() == 0 {
            debug!(path = %item.local_path(), "No upload budget, deferred to next pass");
            return Ok(());
        }

        item.transition_to(SyncState::Uploading)?;
        self.store.set_state(item.id(), SyncState::Uploading).await?;
        self.status
            .notify(item.id(), item.remote_path().clone(), SyncState::Uploading);

        let transfer = match item.kind() {
            ItemKind::Folder => {
                let remote = item.remote_path().clone();
                let result = with_retry(
                    "create_folder",
                    self.config.sync.max_retry_attempts,
                    TRANSFER_BACKOFF_CAP_SECS,
                    || async { self.transport.create_folder(&remote).await },
                )
                .await;
                match result {
                    Err(e)
                        if matches!(
                            e.downcast_ref::<SyncError>(),
                            Some(SyncError::AlreadyExists(_))
                        ) =>
                    {
                        Ok(())
                    }
                    other => other,
                }
            }
            ItemKind::File => {
                let local = item.local_path().clone();
                let remote = item.remote_path().clone();
                with_retry(
                    "upload_file",
                    self.config.sync.max_retry_attempts,
                    TRANSFER_BACKOFF_CAP_SECS,
                    || async {
                        self.transport
                            .upload_file(&local, &remote, noop_progress())
                            .await
                    },
                )
                .await
                .map(|_| ())
            }
        };

        match transfer {
            Ok(()) => {
                lease.record_usage(item.size_bytes());
                item.mark_synced()?;
                self.store.update(&item).await?;
                self.status
                    .notify(item.id(), item.remote_path().clone(), SyncState::Synced);
                self.status
                    .update_progress(|p| p.files_uploaded += 1)
                    .await;
                Ok(())
            }
            Err(e) => self.record_item_failure(item, e).await,
        }
    }

    /// Downloads one CloudOnly item and marks it Synced
    async fn download_item(self: &Arc<Self>, mut item: SyncItem) -> Result<()> {
        let lease = self
            .allocator
            .lease(TransferDirection::Download, TransferPriority::Normal);
        if lease.granted_bps() == 0 {
            debug!(path = %item.local_path(), "No download budget, deferred to next pass");
            return Ok(());
        }

        if let Some(parent) = item.local_path().parent() {
            self.filesystem.create_directory(&parent).await?;
        }

        item.transition_to(SyncState::Downloading)?;
        self.store
            .set_state(item.id(), SyncState::Downloading)
            .await?;
        self.status.notify(
            item.id(),
            item.remote_path().clone(),
            SyncState::Downloading,
        );

        let transfer = match item.kind() {
            ItemKind::Folder => self.filesystem.create_directory(item.local_path()).await,
            ItemKind::File => {
                let local = item.local_path().clone();
                let remote = item.remote_path().clone();
                with_retry(
                    "download_file",
                    self.config.sync.max_retry_attempts,
                    TRANSFER_BACKOFF_CAP_SECS,
                    || async {
                        self.transport
                            .download_file(&remote, &local, noop_progress())
                            .await
                    },
                )
                .await
            }
        };

        match transfer {
            Ok(()) => {
                if item.kind() == ItemKind::File {
                    let state = self.filesystem.get_state(item.local_path()).await?;
                    let hash = self.filesystem.compute_hash(item.local_path()).await?;
                    item.update_content(
                        state.size,
                        state.modified.unwrap_or_else(chrono::Utc::now),
                        Some(hash),
                    );
                }
                lease.record_usage(item.size_bytes());
                item.mark_synced()?;
                self.store.update(&item).await?;
                self.status
                    .notify(item.id(), item.remote_path().clone(), SyncState::Synced);
                self.status
                    .update_progress(|p| p.files_downloaded += 1)
                    .await;
                Ok(())
            }
            Err(e) => self.record_item_failure(item, e).await,
        }
    }

    /// Applies the configured strategy to a conflicted item
    ///
    /// `AskUser` (explicitly or by default) leaves the item in Conflict
    /// for the host to resolve through the resolver API.
    async fn auto_resolve(self: &Arc<Self>, item: SyncItem) -> Result<()> {
        let Some(conflict) = item.conflict() else {
            return Ok(());
        };
        let strategy = self.policy.strategy_for(item.remote_path());
        let Some(resolution) = StrategyPolicy::select_resolution(strategy, conflict) else {
            debug!(path = %item.local_path(), strategy = %strategy, "Conflict awaits manual resolution");
            return Ok(());
        };

        let resolved = self.resolver.resolve(&item, resolution).await?;
        self.status
            .notify(resolved.id(), resolved.remote_path().clone(), resolved.state());
        Ok(())
    }

    /// Freshness recheck for a Synced item (remote 404 prunes the record)
    async fn recheck_synced(self: &Arc<Self>, item: SyncItem) -> Result<()> {
        let remote_info = match item.kind() {
            ItemKind::File => self.transport.get_file_info(item.remote_path()).await,
            ItemKind::Folder => self.transport.get_folder_info(item.remote_path()).await,
        };

        match remote_info {
            Ok(remote) => self.reconcile_synced_against_remote(item, &remote).await,
            Err(e)
                if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::NotFound(_))) =>
            {
                debug!(remote = %item.remote_path(), "Remote replica gone, pruning record");
                let state = self.filesystem.get_state(item.local_path()).await?;
                if state.is_directory() {
                    self.filesystem.delete_directory(item.local_path()).await?;
                } else if state.exists {
                    self.filesystem.delete_file(item.local_path()).await?;
                }
                self.store.delete(item.id()).await?;
                self.status
                    .update_progress(|p| p.files_deleted += 1)
                    .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// A transfer interrupted by a crash: back to its entry state, retried
    async fn recover_interrupted(self: &Arc<Self>, mut item: SyncItem) -> Result<()> {
        let entry = if item.state() == SyncState::Uploading {
            SyncState::LocalOnly
        } else {
            SyncState::CloudOnly
        };
        item.mark_failed("transfer interrupted")?;
        item.reset_for_retry(entry)?;
        self.store.update(&item).await?;
        // Re-dispatched by the next pass; dispatching here would be dropped
        // while this task still holds the item's active-set slot
        Ok(())
    }

    /// Retries exhausted: record the failure on the item, keep the loops
    async fn record_item_failure(
        self: &Arc<Self>,
        mut item: SyncItem,
        err: anyhow::Error,
    ) -> Result<()> {
        if is_fatal(&err) {
            return Err(err);
        }
        warn!(
            path = %item.local_path(),
            error = %format!("{err:#}"),
            "Transfer failed after retries"
        );
        item.mark_failed(format!("{err:#}"))?;
        self.store.update(&item).await?;
        self.status
            .notify(item.id(), item.remote_path().clone(), SyncState::Error);
        self.status.update_progress(|p| p.items_failed += 1).await;
        Ok(())
    }

    /// Propagates a local deletion, journaling it when the network is
    /// the only reason it cannot be done now
    async fn propagate_local_delete(&self, item: &SyncItem) -> Result<()> {
        match self.delete_remote_replica(item).await {
            Ok(()) => Ok(()),
            Err(e) if nimbus_core::retry::is_retryable_error(&e) => {
                debug!(path = %item.local_path(), "Remote unreachable, journaling deletion");
                self.offline_queue.set_online(false);
                self.offline_queue
                    .record(OfflineModification::new(
                        item.local_path().clone(),
                        ModificationKind::Deleted,
                    ))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the remote side of an item; a missing remote is fine
    async fn delete_remote_replica(&self, item: &SyncItem) -> Result<()> {
        let result = match item.kind() {
            ItemKind::File => self.transport.delete_file(item.remote_path()).await,
            ItemKind::Folder => self.transport.delete_folder(item.remote_path()).await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::NotFound(_))) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Path mapping
    // ========================================================================

    /// Derives the remote path for a local path under the sync root
    fn to_remote(&self, local: &LocalPath) -> Result<RemotePath> {
        let relative = local.relative_to(&self.sync_root).ok_or_else(|| {
            SyncError::InvalidConfiguration(format!(
                "'{local}' is outside the sync root '{}'",
                self.sync_root
            ))
        })?;
        let joined = format!("/{}", relative.display()).replace('\\', "/");
        Ok(RemotePath::new(joined)?)
    }

    /// Derives the local path for a remote path
    fn to_local(&self, remote: &RemotePath) -> Result<LocalPath> {
        let relative = remote.as_str().trim_start_matches('/');
        Ok(self.sync_root.join(relative)?)
    }

    /// Id of the tracked parent folder, if the parent is not the root
    async fn parent_item_id(&self, local: &LocalPath) -> Result<Option<ItemId>> {
        let Some(parent) = local.parent() else {
            return Ok(None);
        };
        if parent == self.sync_root {
            return Ok(None);
        }
        Ok(self
            .store
            .get_by_local_path(&parent)
            .await?
            .map(|p| p.id()))
    }

    // ========================================================================
    // Offline access
    // ========================================================================

    /// Pins a remote item into the offline cache
    pub async fn make_available_offline(&self, remote: &RemotePath) -> Result<OfflineCacheItem> {
        self.offline_cache.make_available_offline(remote).await
    }

    /// Unpins a remote item and removes its cached copy
    pub async fn remove_from_offline(&self, remote: &RemotePath) -> Result<()> {
        self.offline_cache.remove_from_offline(remote).await
    }

    /// Number of journaled offline modifications awaiting replay
    pub fn offline_pending(&self) -> usize {
        self.offline_queue.pending()
    }
}

/// Failures that must stop the engine rather than mark one item
fn is_fatal(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::DatabaseUnavailable(_))
    )
}

/// Snapshots both replicas of an item for the conflict detector
fn replica_versions(
    item: &SyncItem,
    fs_state: &FileSystemState,
    local_hash: Option<ContentHash>,
    remote: &RemoteItem,
) -> (VersionInfo, VersionInfo) {
    let local = VersionInfo {
        name: item.name().to_string(),
        kind: item.kind(),
        size_bytes: fs_state.size,
        modified_at: fs_state.modified.unwrap_or_else(chrono::Utc::now),
        hash: local_hash,
    };
    let remote = VersionInfo {
        name: remote.name.clone(),
        kind: remote.kind,
        size_bytes: remote.size_bytes,
        modified_at: remote.modified_at,
        hash: remote.hash.clone(),
    };
    (local, remote)
}

// ============================================================================
// Unit tests (pure helpers; full flows live in tests/engine_tests.rs)
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let fatal = anyhow::Error::new(SyncError::DatabaseUnavailable("locked".into()));
        assert!(is_fatal(&fatal));
        let per_item = anyhow::Error::new(SyncError::ServerError(503));
        assert!(!is_fatal(&per_item));
        let plain = anyhow::anyhow!("some io problem");
        assert!(!is_fatal(&plain));
    }
}
