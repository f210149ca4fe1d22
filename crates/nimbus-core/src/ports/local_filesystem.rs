//! Local filesystem port (driven/secondary port)
//!
//! Interface for all local file I/O: reads, writes, attribute queries,
//! hashing, directory listing, and change watching.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific;
//!   adapters attach a [`SyncError`](crate::domain::SyncError) root cause
//!   so "not found" / "already exists" / "permission denied" /
//!   "insufficient space" stay distinguishable.
//! - `WatchHandle` is an RAII guard: dropping it stops watching.
//! - Watching is decoupled from the filesystem trait so different backends
//!   (inotify on Linux, polling fallback) can coexist.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::domain::{ContentHash, LocalPath};

// ============================================================================
// FileSystemState
// ============================================================================

/// Snapshot of a path's state on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSystemState {
    /// Whether the path exists on disk
    pub exists: bool,
    /// Whether this is a regular file (false for directories)
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent paths)
    pub size: u64,
    /// Last modification time, when available
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// State for a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    /// True if the path exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// True if the path exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

// ============================================================================
// IFileObserver
// ============================================================================

/// Observer for filesystem change events
///
/// Callbacks may be invoked from a background thread (the watcher's event
/// loop), so implementations must be thread-safe.
pub trait IFileObserver: Send + Sync {
    /// A new file or directory appeared
    fn on_created(&self, path: PathBuf);

    /// An existing file's content changed
    fn on_modified(&self, path: PathBuf);

    /// A file or directory was deleted
    fn on_deleted(&self, path: PathBuf);

    /// A file or directory was renamed or moved within the root
    fn on_renamed(&self, from: PathBuf, to: PathBuf);
}

// ============================================================================
// WatchHandle
// ============================================================================

/// RAII handle for an active filesystem watch
///
/// Dropping the handle stops the watch and releases its resources, so
/// watches never leak even if the caller forgets to stop them.
pub struct WatchHandle {
    stop_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    /// Creates a handle whose callback runs exactly once on drop
    pub fn new(stop_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop_fn: Some(Box::new(stop_fn)),
        }
    }

    /// Explicitly stops the watch, consuming the handle
    pub fn stop(mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.stop_fn.is_some())
            .finish()
    }
}

// ============================================================================
// ILocalFileSystem
// ============================================================================

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Reads the entire contents of a file
    async fn read_file(&self, path: &LocalPath) -> anyhow::Result<Vec<u8>>;

    /// Writes data to a file, replacing existing content
    ///
    /// Parent directories are NOT created automatically.
    async fn write_file(&self, path: &LocalPath, data: &[u8]) -> anyhow::Result<()>;

    /// Deletes a file
    async fn delete_file(&self, path: &LocalPath) -> anyhow::Result<()>;

    /// Deletes a directory and everything under it
    async fn delete_directory(&self, path: &LocalPath) -> anyhow::Result<()>;

    /// Moves or renames a file or directory
    async fn move_entry(&self, from: &LocalPath, to: &LocalPath) -> anyhow::Result<()>;

    /// Copies a file
    async fn copy_file(&self, from: &LocalPath, to: &LocalPath) -> anyhow::Result<()>;

    /// Gets the current state of a path
    ///
    /// Returns [`FileSystemState::not_found`] for missing paths instead of
    /// an error.
    async fn get_state(&self, path: &LocalPath) -> anyhow::Result<FileSystemState>;

    /// Computes the SHA-256 content hash of a file
    async fn compute_hash(&self, path: &LocalPath) -> anyhow::Result<ContentHash>;

    /// Creates a directory and all needed parents (`mkdir -p`)
    async fn create_directory(&self, path: &LocalPath) -> anyhow::Result<()>;

    /// Lists the direct entries of a directory
    async fn list_directory(&self, path: &LocalPath) -> anyhow::Result<Vec<LocalPath>>;

    /// Available space in bytes on the filesystem holding `path`
    async fn available_space(&self, path: &LocalPath) -> anyhow::Result<u64>;

    /// Starts watching a directory tree for changes
    ///
    /// # Returns
    /// An RAII handle that stops the watch on drop
    async fn watch(&self, path: &LocalPath) -> anyhow::Result<WatchHandle>;
}
