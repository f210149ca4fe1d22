//! Conflict resolution executor
//!
//! Applies a chosen [`Resolution`] by performing the actual file and
//! transport operations, then persists the resolved item:
//!
//! - `KeepLocal`: make the remote match the local replica
//! - `KeepCloud`: make the local replica match the remote
//! - `KeepBoth`: preserve local edits in a conflicted-copy sibling, then
//!   pull the remote into the original path
//! - `Merge`: shallow union of both folders' immediate children
//!
//! Every successful resolution ends with the item in `synced` state, its
//! conflict descriptor cleared, and the store updated. A failed resolution
//! leaves the item in conflict so it can be retried.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use nimbus_core::domain::{
    ConflictInfo, ConflictType, ItemId, ItemKind, RemotePath, Resolution, SyncError, SyncItem,
};
use nimbus_core::ports::{ICloudTransport, ILocalFileSystem, IMetadataStore, ProgressFn};

use crate::namer::ConflictNamer;
use crate::policy::StrategyPolicy;

// ============================================================================
// Batch results
// ============================================================================

/// What happened to one item during a batch resolution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// A resolution was selected and applied
    Resolved(Resolution),
    /// No resolution was auto-selected (`ask_user` or no conflict)
    Skipped,
    /// A resolution was selected but applying it failed
    Failed(String),
}

/// Per-item outcomes of a batch resolution pass
///
/// A failure never aborts the batch; each item gets its own outcome.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<(ItemId, BatchOutcome)>,
}

impl BatchResult {
    pub fn resolved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BatchOutcome::Resolved(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BatchOutcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BatchOutcome::Failed(_)))
            .count()
    }

    /// Iterates the failures as (item id, error message)
    pub fn failures(&self) -> impl Iterator<Item = (ItemId, &str)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            BatchOutcome::Failed(msg) => Some((*id, msg.as_str())),
            _ => None,
        })
    }
}

// ============================================================================
// ConflictResolver
// ============================================================================

fn noop_progress() -> ProgressFn {
    Box::new(|_, _| {})
}

/// Applies conflict resolutions with real store, transport, and filesystem
/// operations
pub struct ConflictResolver {
    store: Arc<dyn IMetadataStore>,
    transport: Arc<dyn ICloudTransport>,
    filesystem: Arc<dyn ILocalFileSystem>,
    namer: ConflictNamer,
}

impl ConflictResolver {
    pub fn new(
        store: Arc<dyn IMetadataStore>,
        transport: Arc<dyn ICloudTransport>,
        filesystem: Arc<dyn ILocalFileSystem>,
    ) -> Self {
        Self {
            store,
            transport,
            filesystem,
            namer: ConflictNamer::new(),
        }
    }

    /// Applies `resolution` to a conflicted item
    ///
    /// # Errors
    /// Fails with [`SyncError::InvalidResolution`] when the item carries no
    /// conflict or the resolution is not legal for the conflict's type
    /// (`merge` on non-folder pairs). Transport and filesystem failures
    /// propagate; in every failure case the stored item is left untouched.
    ///
    /// # Returns
    /// The resolved item, already persisted in `synced` state.
    pub async fn resolve(&self, item: &SyncItem, resolution: Resolution) -> anyhow::Result<SyncItem> {
        let conflict = item.conflict().cloned().ok_or_else(|| {
            SyncError::InvalidResolution(format!("item '{}' is not in conflict", item.name()))
        })?;

        if !conflict.allows(resolution) {
            return Err(SyncError::InvalidResolution(format!(
                "{} cannot resolve a {} conflict on '{}'",
                resolution,
                conflict.conflict_type,
                item.name()
            ))
            .into());
        }

        info!(
            item_id = %item.id(),
            path = %item.local_path(),
            conflict_type = %conflict.conflict_type,
            resolution = %resolution,
            "Applying conflict resolution"
        );

        let mut updated = item.clone();
        match resolution {
            Resolution::KeepLocal => {
                self.apply_keep_local(&updated, &conflict).await?;
            }
            Resolution::KeepCloud => {
                self.apply_keep_cloud(&mut updated, &conflict).await?;
            }
            Resolution::KeepBoth => {
                let copy = self.apply_keep_both(&updated, &conflict).await?;
                debug!(copy = %copy.name(), "Conflicted copy created");
                self.apply_keep_cloud(&mut updated, &conflict).await?;
            }
            Resolution::Merge => {
                self.apply_merge(&updated).await?;
            }
        }

        updated.mark_synced()?;
        self.store
            .update(&updated)
            .await
            .context("persist resolved item")?;

        info!(item_id = %updated.id(), "Conflict resolved");
        Ok(updated)
    }

    /// Resolves a set of conflicted items under the configured policy
    ///
    /// Items whose strategy maps to `ask_user` (or that carry no conflict)
    /// are skipped; individual failures are recorded and do not abort the
    /// rest of the batch.
    pub async fn resolve_batch(&self, items: Vec<SyncItem>, policy: &StrategyPolicy) -> BatchResult {
        let mut result = BatchResult::default();

        for item in items {
            let Some(conflict) = item.conflict() else {
                result.outcomes.push((item.id(), BatchOutcome::Skipped));
                continue;
            };

            let strategy = policy.strategy_for(item.remote_path());
            let Some(resolution) = StrategyPolicy::select_resolution(strategy, conflict) else {
                debug!(
                    item_id = %item.id(),
                    strategy = %strategy,
                    "No automatic resolution, leaving conflict for the user"
                );
                result.outcomes.push((item.id(), BatchOutcome::Skipped));
                continue;
            };

            match self.resolve(&item, resolution).await {
                Ok(_) => result
                    .outcomes
                    .push((item.id(), BatchOutcome::Resolved(resolution))),
                Err(e) => {
                    warn!(item_id = %item.id(), error = %e, "Batch resolution failed for item");
                    result
                        .outcomes
                        .push((item.id(), BatchOutcome::Failed(format!("{e:#}"))));
                }
            }
        }

        result
    }

    // ------------------------------------------------------------------
    // Resolution mechanics
    // ------------------------------------------------------------------

    /// Keep local: push the local replica's state to the remote
    async fn apply_keep_local(
        &self,
        item: &SyncItem,
        conflict: &ConflictInfo,
    ) -> anyhow::Result<()> {
        match conflict.conflict_type {
            ConflictType::Content => {
                self.transport
                    .upload_file(item.local_path(), item.remote_path(), noop_progress())
                    .await
                    .context("upload local version")?;
            }
            ConflictType::Name => {
                // The remote item still lives under its own name
                let parent = item.remote_path().parent().unwrap_or_else(RemotePath::root);
                let remote_actual = parent.join(&conflict.remote.name)?;
                if remote_actual != *item.remote_path() {
                    self.transport
                        .move_item(&remote_actual, item.remote_path())
                        .await
                        .context("rename remote to local name")?;
                }
            }
            ConflictType::Type => {
                match conflict.remote.kind {
                    ItemKind::File => self.transport.delete_file(item.remote_path()).await,
                    ItemKind::Folder => self.transport.delete_folder(item.remote_path()).await,
                }
                .context("remove remote replica of mismatched kind")?;

                match item.kind() {
                    ItemKind::File => {
                        self.transport
                            .upload_file(item.local_path(), item.remote_path(), noop_progress())
                            .await
                            .context("upload local version")?;
                    }
                    ItemKind::Folder => {
                        self.transport
                            .create_folder(item.remote_path())
                            .await
                            .context("recreate remote folder")?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Keep cloud: make the local replica match the remote
    async fn apply_keep_cloud(
        &self,
        item: &mut SyncItem,
        conflict: &ConflictInfo,
    ) -> anyhow::Result<()> {
        match conflict.conflict_type {
            ConflictType::Content => {
                self.transport
                    .download_file(item.remote_path(), item.local_path(), noop_progress())
                    .await
                    .context("download remote version")?;
                self.refresh_from_disk(item).await?;
            }
            ConflictType::Name => {
                let local_parent = item.local_path().parent().ok_or_else(|| {
                    SyncError::InvalidResolution("cannot rename the sync root".to_string())
                })?;
                let new_local = local_parent.join(&conflict.remote.name)?;
                let remote_parent = item.remote_path().parent().unwrap_or_else(RemotePath::root);
                let new_remote = remote_parent.join(&conflict.remote.name)?;

                self.filesystem
                    .move_entry(item.local_path(), &new_local)
                    .await
                    .context("rename local to remote name")?;
                item.relocate(new_local, new_remote);
            }
            ConflictType::Type => {
                match item.kind() {
                    ItemKind::File => self.filesystem.delete_file(item.local_path()).await,
                    ItemKind::Folder => self.filesystem.delete_directory(item.local_path()).await,
                }
                .context("remove local replica of mismatched kind")?;

                match conflict.remote.kind {
                    ItemKind::File => {
                        self.transport
                            .download_file(item.remote_path(), item.local_path(), noop_progress())
                            .await
                            .context("download remote version")?;
                        item.change_kind(ItemKind::File);
                        self.refresh_from_disk(item).await?;
                    }
                    ItemKind::Folder => {
                        self.filesystem
                            .create_directory(item.local_path())
                            .await
                            .context("recreate local folder")?;
                        item.change_kind(ItemKind::Folder);
                    }
                }
            }
        }
        Ok(())
    }

    /// Keep both: divert the local replica into a conflicted-copy sibling
    ///
    /// The copy carries the local edits; the original path is then pulled
    /// from the remote by the subsequent keep-cloud step. Returns the new
    /// sibling item, already inserted in the store.
    async fn apply_keep_both(
        &self,
        item: &SyncItem,
        conflict: &ConflictInfo,
    ) -> anyhow::Result<SyncItem> {
        let local_parent = item.local_path().parent().ok_or_else(|| {
            SyncError::InvalidResolution("cannot duplicate the sync root".to_string())
        })?;
        let remote_parent = item.remote_path().parent().unwrap_or_else(RemotePath::root);

        // Probe against names already present on disk
        let siblings = self
            .filesystem
            .list_directory(&local_parent)
            .await
            .context("list sibling entries")?;
        let taken: HashSet<String> = siblings
            .iter()
            .filter_map(|p| p.file_name().map(str::to_string))
            .collect();
        let copy_name = self
            .namer
            .generate_unique(item.name(), conflict.detected_at, |c| taken.contains(c));

        let copy_local = local_parent.join(&copy_name)?;
        let copy_remote = remote_parent.join(&copy_name)?;

        match item.kind() {
            ItemKind::File => {
                self.filesystem
                    .copy_file(item.local_path(), &copy_local)
                    .await
                    .context("copy local version to conflicted copy")?;
            }
            ItemKind::Folder => {
                // Directories are diverted wholesale; the original path is
                // recreated empty for the remote content
                self.filesystem
                    .move_entry(item.local_path(), &copy_local)
                    .await
                    .context("move local folder to conflicted copy")?;
                self.filesystem
                    .create_directory(item.local_path())
                    .await
                    .context("recreate original folder")?;
            }
        }

        let fs_state = self.filesystem.get_state(&copy_local).await?;
        let hash = if item.kind() == ItemKind::File {
            Some(self.filesystem.compute_hash(&copy_local).await?)
        } else {
            None
        };

        let mut copy = SyncItem::new_local(
            copy_local,
            copy_remote,
            item.kind(),
            fs_state.size,
            fs_state.modified.unwrap_or_else(Utc::now),
            hash,
        );
        copy.set_parent_id(item.parent_id());
        self.store
            .insert(&copy)
            .await
            .context("record conflicted copy")?;

        info!(
            original = %item.local_path(),
            copy = %copy.local_path(),
            "Keep-both: local edits preserved in conflicted copy"
        );
        Ok(copy)
    }

    /// Merge: shallow union of both folders' immediate children
    ///
    /// Children present on only one side become tracked items in the
    /// matching one-sided state; the reconciliation loop transfers them on
    /// its next pass. Children present on both sides are left alone (deep
    /// divergences surface as their own conflicts).
    async fn apply_merge(&self, item: &SyncItem) -> anyhow::Result<()> {
        let remote_children = self
            .transport
            .list_folder(item.remote_path())
            .await
            .context("list remote children")?;
        let local_children = self
            .filesystem
            .list_directory(item.local_path())
            .await
            .context("list local children")?;

        let local_names: HashSet<String> = local_children
            .iter()
            .filter_map(|p| p.file_name().map(str::to_string))
            .collect();
        let remote_names: HashSet<&str> =
            remote_children.iter().map(|c| c.name.as_str()).collect();

        for child in &remote_children {
            if local_names.contains(&child.name) {
                continue;
            }
            if self.store.get_by_remote_path(&child.path).await?.is_some() {
                continue;
            }
            let local = item.local_path().join(&child.name)?;
            let mut entry = SyncItem::new_remote(
                local,
                child.path.clone(),
                child.kind,
                child.size_bytes,
                child.modified_at,
                child.hash.clone(),
            );
            entry.set_parent_id(Some(item.id()));
            self.store.insert(&entry).await?;
            debug!(path = %child.path, "Merge: tracking remote-only child");
        }

        for path in &local_children {
            let Some(name) = path.file_name() else { continue };
            if remote_names.contains(name) {
                continue;
            }
            if self.store.get_by_local_path(path).await?.is_some() {
                continue;
            }
            let fs_state = self.filesystem.get_state(path).await?;
            let kind = if fs_state.is_directory() {
                ItemKind::Folder
            } else {
                ItemKind::File
            };
            let hash = if kind == ItemKind::File {
                Some(self.filesystem.compute_hash(path).await?)
            } else {
                None
            };
            let remote = item.remote_path().join(name)?;
            let mut entry = SyncItem::new_local(
                path.clone(),
                remote,
                kind,
                fs_state.size,
                fs_state.modified.unwrap_or_else(Utc::now),
                hash,
            );
            entry.set_parent_id(Some(item.id()));
            self.store.insert(&entry).await?;
            debug!(path = %path, "Merge: tracking local-only child");
        }

        Ok(())
    }

    /// Re-reads size, mtime, and hash from disk after the local replica
    /// changed
    async fn refresh_from_disk(&self, item: &mut SyncItem) -> anyhow::Result<()> {
        let fs_state = self.filesystem.get_state(item.local_path()).await?;
        let hash = if item.kind() == ItemKind::File {
            Some(self.filesystem.compute_hash(item.local_path()).await?)
        } else {
            None
        };
        item.update_content(
            fs_state.size,
            fs_state.modified.unwrap_or_else(Utc::now),
            hash,
        );
        Ok(())
    }
}
