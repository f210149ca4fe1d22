//! Local filesystem adapter (driven adapter)
//!
//! Implements [`ILocalFileSystem`] over `tokio::fs`.
//!
//! - Writes are atomic: temp file in the target directory, then rename.
//! - Hashes are SHA-256 over the full content, hex-encoded.
//! - Free-space queries go through `statvfs` on a blocking thread.
//! - `watch` returns a no-op handle; live watching runs through
//!   [`RootWatcher`](crate::watcher::RootWatcher), which owns its own
//!   notify instance.

use std::io::ErrorKind;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use nimbus_core::domain::{ContentHash, LocalPath, SyncError};
use nimbus_core::ports::{FileSystemState, ILocalFileSystem, WatchHandle};

/// Adapter bridging the [`ILocalFileSystem`] port to the real filesystem
///
/// Zero-sized: every operation derives its context from the [`LocalPath`]
/// arguments. The sync root and exclude rules live in the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Maps an io error onto the `SyncError` taxonomy so callers can classify
/// failures by downcasting
fn classify_io(err: std::io::Error, path: &LocalPath) -> anyhow::Error {
    let sync_err = match err.kind() {
        ErrorKind::NotFound => SyncError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => SyncError::AlreadyExists(path.to_string()),
        ErrorKind::PermissionDenied => SyncError::PermissionDenied(path.to_string()),
        _ => return anyhow::Error::new(err).context(format!("io error at {path}")),
    };
    anyhow::Error::new(err).context(sync_err)
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path))]
    async fn read_file(&self, path: &LocalPath) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(path.as_path())
            .await
            .map_err(|e| classify_io(e, path))?;
        debug!(bytes = data.len(), "File read");
        Ok(data)
    }

    // Atomic: write a sibling temp file, then rename over the target. The
    // rename stays on one filesystem, so readers see old or new content,
    // never a torn write.
    #[instrument(skip(self, data), fields(path = %path, bytes = data.len()))]
    async fn write_file(&self, path: &LocalPath, data: &[u8]) -> anyhow::Result<()> {
        let target = path.as_path();
        let tmp_path = {
            let mut os = target.as_os_str().to_owned();
            // ".partial" keeps the temp file inside the default exclude
            // patterns, so the watcher never reports it
            os.push(".partial");
            std::path::PathBuf::from(os)
        };

        tokio::fs::write(&tmp_path, data)
            .await
            .map_err(|e| classify_io(e, path))?;
        tokio::fs::rename(&tmp_path, target)
            .await
            .map_err(|e| classify_io(e, path))?;
        debug!("File written atomically");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete_file(&self, path: &LocalPath) -> anyhow::Result<()> {
        tokio::fs::remove_file(path.as_path())
            .await
            .map_err(|e| classify_io(e, path))?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete_directory(&self, path: &LocalPath) -> anyhow::Result<()> {
        tokio::fs::remove_dir_all(path.as_path())
            .await
            .map_err(|e| classify_io(e, path))?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn move_entry(&self, from: &LocalPath, to: &LocalPath) -> anyhow::Result<()> {
        tokio::fs::rename(from.as_path(), to.as_path())
            .await
            .map_err(|e| classify_io(e, from))?;
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn copy_file(&self, from: &LocalPath, to: &LocalPath) -> anyhow::Result<()> {
        tokio::fs::copy(from.as_path(), to.as_path())
            .await
            .map_err(|e| classify_io(e, from))?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get_state(&self, path: &LocalPath) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(classify_io(e, path)),
        };

        let modified: Option<DateTime<Utc>> = metadata
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(FileSystemState {
            exists: true,
            is_file: metadata.is_file(),
            size: metadata.len(),
            modified,
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn compute_hash(&self, path: &LocalPath) -> anyhow::Result<ContentHash> {
        let data = tokio::fs::read(path.as_path())
            .await
            .map_err(|e| classify_io(e, path))?;
        let digest = format!("{:x}", Sha256::digest(&data));
        debug!(hash = %digest, "Hash computed");
        Ok(ContentHash::new(digest)?)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &LocalPath) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path.as_path())
            .await
            .map_err(|e| classify_io(e, path))?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn list_directory(&self, path: &LocalPath) -> anyhow::Result<Vec<LocalPath>> {
        let mut entries = tokio::fs::read_dir(path.as_path())
            .await
            .map_err(|e| classify_io(e, path))?;

        let mut listed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match LocalPath::new(entry.path()) {
                Ok(p) => listed.push(p),
                Err(e) => debug!(entry = ?entry.path(), error = %e, "Skipping unrepresentable entry"),
            }
        }
        Ok(listed)
    }

    #[cfg(unix)]
    #[instrument(skip(self), fields(path = %path))]
    async fn available_space(&self, path: &LocalPath) -> anyhow::Result<u64> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_path().as_os_str().as_bytes())
            .context("path contains interior NUL")?;

        tokio::task::spawn_blocking(move || {
            let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
            if rc != 0 {
                return Err(anyhow::Error::new(std::io::Error::last_os_error())
                    .context("statvfs failed"));
            }
            // f_bavail counts blocks available to unprivileged callers
            Ok(stats.f_bavail as u64 * stats.f_frsize as u64)
        })
        .await?
    }

    #[cfg(not(unix))]
    async fn available_space(&self, _path: &LocalPath) -> anyhow::Result<u64> {
        Ok(u64::MAX)
    }

    // No-op handle: live watching is RootWatcher's job, which needs the
    // event channel wiring this trait cannot express
    #[instrument(skip(self), fields(path = %path))]
    async fn watch(&self, _path: &LocalPath) -> anyhow::Result<WatchHandle> {
        Ok(WatchHandle::new(|| {}))
    }
}

// ============================================================================
// Unit tests
// ============================================================================
