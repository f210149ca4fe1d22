//! Cloud transport port (driven/secondary port)
//!
//! Narrow contract against the remote file API. The engine never talks HTTP
//! directly; it calls this trait and relies on implementations mapping their
//! native failures into the [`SyncError`](crate::domain::SyncError)
//! taxonomy - the retry policy depends on being able to tell "not found"
//! from "server error" from "rate limited" from "network error".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChangeCursor, ContentHash, ItemKind, LocalPath, RemotePath};

// ============================================================================
// DTOs
// ============================================================================

/// Remote-side metadata for one item, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Canonical remote path
    pub path: RemotePath,
    /// Display name (last path segment)
    pub name: String,
    /// File or folder
    pub kind: ItemKind,
    /// Size in bytes (0 for folders)
    pub size_bytes: u64,
    /// Remote modification time
    pub modified_at: DateTime<Utc>,
    /// Content hash, when the remote provides one (files only)
    pub hash: Option<ContentHash>,
}

/// One entry in a remote change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// The item after the change (current remote state)
    pub item: RemoteItem,
    /// True if the item was deleted remotely; `item` then describes the
    /// last known state
    pub deleted: bool,
}

/// A page of remote changes since a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changes in remote order
    pub changes: Vec<RemoteChange>,
    /// Cursor to persist for the next poll
    pub next_cursor: ChangeCursor,
}

/// Progress callback invoked with (bytes transferred so far, total bytes)
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

// ============================================================================
// ICloudTransport
// ============================================================================

/// Port trait for all remote file operations
///
/// ## Error mapping
///
/// Implementations attach a `SyncError` as the root cause of their
/// `anyhow::Error` so the engine can classify failures by downcasting:
/// HTTP 404 → `NotFound`, 429 → `RateLimited`, 5xx → `ServerError`,
/// connection failures → `NetworkUnavailable`/`ConnectionTimeout`.
#[async_trait]
pub trait ICloudTransport: Send + Sync {
    /// Uploads a local file, creating or replacing the remote copy
    ///
    /// # Arguments
    /// * `local` - Source file on disk
    /// * `remote` - Destination remote path
    /// * `on_progress` - Invoked as bytes go out (may be a no-op)
    ///
    /// # Returns
    /// The remote metadata of the uploaded file
    async fn upload_file(
        &self,
        local: &LocalPath,
        remote: &RemotePath,
        on_progress: ProgressFn,
    ) -> anyhow::Result<RemoteItem>;

    /// Downloads a remote file to the given local path
    async fn download_file(
        &self,
        remote: &RemotePath,
        local: &LocalPath,
        on_progress: ProgressFn,
    ) -> anyhow::Result<()>;

    /// Deletes a remote file
    async fn delete_file(&self, remote: &RemotePath) -> anyhow::Result<()>;

    /// Deletes a remote folder and its contents
    async fn delete_folder(&self, remote: &RemotePath) -> anyhow::Result<()>;

    /// Moves or renames a remote item
    async fn move_item(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<()>;

    /// Copies a remote file
    async fn copy_file(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<()>;

    /// Creates a remote folder (parents must exist)
    async fn create_folder(&self, remote: &RemotePath) -> anyhow::Result<()>;

    /// Lists the direct children of a remote folder
    async fn list_folder(&self, remote: &RemotePath) -> anyhow::Result<Vec<RemoteItem>>;

    /// Fetches metadata for one remote file
    async fn get_file_info(&self, remote: &RemotePath) -> anyhow::Result<RemoteItem>;

    /// Fetches metadata for one remote folder
    async fn get_folder_info(&self, remote: &RemotePath) -> anyhow::Result<RemoteItem>;

    /// Pulls the change feed since `cursor` (None = from the beginning)
    async fn get_changes(&self, cursor: Option<&ChangeCursor>) -> anyhow::Result<ChangeSet>;
}
