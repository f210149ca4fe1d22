//! Metadata store port (driven/secondary port)
//!
//! The metadata store is the sole source of truth for "what do we know
//! about this path". It persists every [`SyncItem`], one global
//! configuration record, and the previous selective-sync selection set.
//!
//! ## Contract
//!
//! - Per-item writes are atomic: a concurrent reader sees either the old
//!   or the new row, never a partial update.
//! - Exactly one item per (local path, remote path) pair; `upsert` is the
//!   write path that preserves this.
//! - Store unavailability must surface as a distinct error
//!   ([`SyncError::DatabaseUnavailable`](crate::domain::SyncError)) - the
//!   orchestrator treats it as fatal, never as a skippable item failure.

use async_trait::async_trait;

use crate::domain::{ItemId, LocalPath, RemotePath, SyncItem, SyncState};

/// Port trait for the durable sync-item table
///
/// Implementations must be safe to call from many concurrently running
/// per-item tasks; per-item reads and writes of the same item must be
/// serializable.
#[async_trait]
pub trait IMetadataStore: Send + Sync {
    /// Inserts a new item
    ///
    /// # Errors
    /// Fails if an item with the same id or (local, remote) pair exists.
    async fn insert(&self, item: &SyncItem) -> anyhow::Result<()>;

    /// Updates an existing item in full
    ///
    /// # Errors
    /// Fails if no item with this id exists.
    async fn update(&self, item: &SyncItem) -> anyhow::Result<()>;

    /// Inserts the item, or replaces the stored row if it already exists
    async fn upsert(&self, item: &SyncItem) -> anyhow::Result<()>;

    /// Deletes an item by id (no-op if absent)
    async fn delete(&self, id: ItemId) -> anyhow::Result<()>;

    /// Fetches one item by id
    async fn get(&self, id: ItemId) -> anyhow::Result<Option<SyncItem>>;

    /// Fetches one item by its local path
    async fn get_by_local_path(&self, path: &LocalPath) -> anyhow::Result<Option<SyncItem>>;

    /// Fetches one item by its remote path
    async fn get_by_remote_path(&self, path: &RemotePath) -> anyhow::Result<Option<SyncItem>>;

    /// Lists every tracked item
    async fn list_all(&self) -> anyhow::Result<Vec<SyncItem>>;

    /// Lists items currently in `state`
    async fn list_by_state(&self, state: SyncState) -> anyhow::Result<Vec<SyncItem>>;

    /// Lists the direct children of `parent`
    async fn list_children(&self, parent: ItemId) -> anyhow::Result<Vec<SyncItem>>;

    /// Updates only the sync state of one item
    ///
    /// Cheaper than a full `update` for the common transition-only write.
    async fn set_state(&self, id: ItemId, state: SyncState) -> anyhow::Result<()>;

    /// Persists the single global configuration record (JSON blob)
    async fn save_config(&self, config_json: &str) -> anyhow::Result<()>;

    /// Loads the global configuration record, if one was ever saved
    ///
    /// A malformed stored record degrades to the last successfully saved
    /// copy; only with no prior copy to fall back to does the corruption
    /// surface as an error.
    async fn load_config(&self) -> anyhow::Result<Option<String>>;

    /// Persists the previous selective-sync selection set
    async fn save_previous_selection(&self, remote_paths: &[RemotePath]) -> anyhow::Result<()>;

    /// Loads the previous selective-sync selection set (empty if never saved)
    async fn load_previous_selection(&self) -> anyhow::Result<Vec<RemotePath>>;

    /// Persists the remote change cursor between reconciliation passes
    async fn save_change_cursor(&self, cursor: &str) -> anyhow::Result<()>;

    /// Loads the persisted change cursor, if any
    async fn load_change_cursor(&self) -> anyhow::Result<Option<String>>;
}
