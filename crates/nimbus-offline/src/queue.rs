//! Offline modification queue
//!
//! While the remote is unreachable, local changes are journaled as
//! [`OfflineModification`]s. On reconnect the journal is replayed strictly
//! in timestamp order, so a modify followed by a delete nets out to a
//! delete on the remote too.
//!
//! Replay outcome per record:
//! - success: the record is removed
//! - retryable failure (network trouble, server errors, a conflict raised
//!   during replay): the record is kept for the next pass
//! - non-retryable failure (local file gone, invalid path) or a record
//!   older than the retry horizon: the record is dropped

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use nimbus_core::domain::{
    LocalPath, ModificationKind, OfflineModification, RemotePath, SyncError,
};
use nimbus_core::ports::{ICloudTransport, ILocalFileSystem, ProgressFn};
use nimbus_core::retry::is_retryable_error;

use std::sync::Arc;

fn noop_progress() -> ProgressFn {
    Box::new(|_, _| {})
}

/// Outcome counts of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records applied to the remote and removed
    pub replayed: u32,
    /// Records kept for the next pass after a retryable failure
    pub kept: u32,
    /// Records abandoned (expired or non-retryable)
    pub dropped: u32,
}

/// Timestamp-ordered journal of local changes made while offline
pub struct OfflineQueue {
    sync_root: LocalPath,
    transport: Arc<dyn ICloudTransport>,
    filesystem: Arc<dyn ILocalFileSystem>,
    entries: Mutex<Vec<OfflineModification>>,
    online: AtomicBool,
    retry_horizon: Duration,
}

impl OfflineQueue {
    pub fn new(
        sync_root: LocalPath,
        transport: Arc<dyn ICloudTransport>,
        filesystem: Arc<dyn ILocalFileSystem>,
        retry_horizon_hours: i64,
    ) -> Self {
        Self {
            sync_root,
            transport,
            filesystem,
            entries: Mutex::new(Vec::new()),
            online: AtomicBool::new(false),
            retry_horizon: Duration::hours(retry_horizon_hours.max(1)),
        }
    }

    /// Marks the queue online or offline; a replay must follow a
    /// transition to online
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of journaled records awaiting replay
    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Journals a local change
    ///
    /// While online the change is applied to the remote immediately; a
    /// retryable failure enqueues it instead. While offline it is inserted
    /// in timestamp order.
    pub async fn record(&self, modification: OfflineModification) -> anyhow::Result<()> {
        if self.is_online() {
            match self.apply(&modification).await {
                Ok(()) => {
                    debug!(
                        path = %modification.path,
                        kind = modification.kind.name(),
                        "Change applied directly"
                    );
                    return Ok(());
                }
                Err(e) if Self::is_replay_retryable(&e) => {
                    warn!(
                        path = %modification.path,
                        error = %e,
                        "Direct apply failed, journaling for replay"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.enqueue(modification);
        Ok(())
    }

    /// Replays the journal strictly in timestamp order
    pub async fn replay(&self) -> ReplayReport {
        let pending = std::mem::take(&mut *self.entries.lock().unwrap());
        let mut report = ReplayReport::default();
        let mut kept = Vec::new();
        let now = Utc::now();

        for mut modification in pending {
            if modification.is_expired(self.retry_horizon, now) {
                warn!(
                    path = %modification.path,
                    kind = modification.kind.name(),
                    "Dropping journaled change older than the retry horizon"
                );
                report.dropped += 1;
                continue;
            }

            match self.apply(&modification).await {
                Ok(()) => {
                    debug!(
                        path = %modification.path,
                        kind = modification.kind.name(),
                        "Journaled change replayed"
                    );
                    report.replayed += 1;
                }
                Err(e) if Self::is_replay_retryable(&e) => {
                    modification.attempts += 1;
                    debug!(
                        path = %modification.path,
                        attempts = modification.attempts,
                        error = %e,
                        "Replay failed, keeping record"
                    );
                    report.kept += 1;
                    kept.push(modification);
                }
                Err(e) => {
                    warn!(
                        path = %modification.path,
                        kind = modification.kind.name(),
                        error = %e,
                        "Dropping journaled change after non-retryable failure"
                    );
                    report.dropped += 1;
                }
            }
        }

        // Records journaled during the replay merge back in order
        let mut entries = self.entries.lock().unwrap();
        entries.extend(kept);
        entries.sort_by_key(|m| m.timestamp);

        info!(
            replayed = report.replayed,
            kept = report.kept,
            dropped = report.dropped,
            "Offline journal replay finished"
        );
        report
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn enqueue(&self, modification: OfflineModification) {
        let mut entries = self.entries.lock().unwrap();
        let at = entries.partition_point(|m| m.timestamp <= modification.timestamp);
        entries.insert(at, modification);
    }

    /// A conflict raised during replay is retryable here: the next
    /// reconciliation pass will park the item for resolution
    fn is_replay_retryable(error: &anyhow::Error) -> bool {
        if matches!(error.downcast_ref::<SyncError>(), Some(SyncError::Conflict(_))) {
            return true;
        }
        is_retryable_error(error)
    }

    fn to_remote(&self, path: &LocalPath) -> anyhow::Result<RemotePath> {
        let relative = path.relative_to(&self.sync_root).ok_or_else(|| {
            SyncError::InvalidConfiguration(format!(
                "path '{path}' is outside the sync root"
            ))
        })?;
        let joined = format!("/{}", relative.display()).replace('\\', "/");
        Ok(RemotePath::new(joined)?)
    }

    /// Maps one journaled change onto transport operations
    async fn apply(&self, modification: &OfflineModification) -> anyhow::Result<()> {
        let remote = self.to_remote(&modification.path)?;
        match &modification.kind {
            ModificationKind::Created | ModificationKind::Modified => {
                let state = self.filesystem.get_state(&modification.path).await?;
                if state.is_directory() {
                    self.transport.create_folder(&remote).await
                } else if state.is_regular_file() {
                    self.transport
                        .upload_file(&modification.path, &remote, noop_progress())
                        .await
                        .map(|_| ())
                } else {
                    Err(SyncError::NotFound(modification.path.to_string()).into())
                }
            }
            ModificationKind::Deleted => self.apply_delete(&remote).await,
            ModificationKind::Renamed { old_name } => {
                let parent = remote.parent().unwrap_or_else(RemotePath::root);
                let old_remote = parent.join(old_name)?;
                self.transport.move_item(&old_remote, &remote).await
            }
            ModificationKind::Moved { old_path } => {
                let old_remote = self.to_remote(old_path)?;
                self.transport.move_item(&old_remote, &remote).await
            }
        }
    }

    /// The local entry is gone, so its kind must be probed remotely
    async fn apply_delete(&self, remote: &RemotePath) -> anyhow::Result<()> {
        match self.transport.get_file_info(remote).await {
            Ok(_) => return self.transport.delete_file(remote).await,
            Err(e) if !matches!(e.downcast_ref::<SyncError>(), Some(SyncError::NotFound(_))) => {
                return Err(e);
            }
            Err(_) => {}
        }
        match self.transport.get_folder_info(remote).await {
            Ok(_) => self.transport.delete_folder(remote).await,
            // Already gone on both sides: the delete is a no-op
            Err(e) if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::NotFound(_))) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
