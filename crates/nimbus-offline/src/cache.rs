//! Offline file cache
//!
//! Remote files pulled down for offline access live in a flat cache
//! directory, each under a name derived from the SHA-256 of its remote
//! path (so arbitrary remote names can never escape the cache directory).
//! The in-memory index maps remote paths to [`OfflineCacheItem`] records.
//!
//! The cache is bounded: `cleanup_cache` evicts the oldest-accessed
//! evictable entries until usage drops to `capacity x threshold`. Pinned
//! entries are never evicted; they only leave through
//! `remove_from_offline` or when their remote disappears.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use nimbus_core::domain::{CachePriority, LocalPath, OfflineCacheItem, RemotePath, SyncError};
use nimbus_core::ports::{ICloudTransport, ILocalFileSystem, ProgressFn};

fn noop_progress() -> ProgressFn {
    Box::new(|_, _| {})
}

/// Bounded local cache of remote files for offline access
pub struct OfflineCache {
    cache_dir: LocalPath,
    capacity_bytes: u64,
    transport: Arc<dyn ICloudTransport>,
    filesystem: Arc<dyn ILocalFileSystem>,
    entries: DashMap<String, OfflineCacheItem>,
}

impl OfflineCache {
    pub fn new(
        cache_dir: LocalPath,
        capacity_bytes: u64,
        transport: Arc<dyn ICloudTransport>,
        filesystem: Arc<dyn ILocalFileSystem>,
    ) -> Self {
        Self {
            cache_dir,
            capacity_bytes,
            transport,
            filesystem,
            entries: DashMap::new(),
        }
    }

    /// Pins a remote file into the cache for offline access
    pub async fn make_available_offline(
        &self,
        remote: &RemotePath,
    ) -> anyhow::Result<OfflineCacheItem> {
        self.cache_file(remote, CachePriority::Pinned).await
    }

    /// Caches a remote file with the given eviction class
    pub async fn cache_file(
        &self,
        remote: &RemotePath,
        priority: CachePriority,
    ) -> anyhow::Result<OfflineCacheItem> {
        self.filesystem.create_directory(&self.cache_dir).await?;
        let cache_path = self.backing_path(remote)?;
        self.transport
            .download_file(remote, &cache_path, noop_progress())
            .await?;
        let state = self.filesystem.get_state(&cache_path).await?;

        let item = OfflineCacheItem::new(remote.clone(), cache_path, state.size, priority);
        self.entries
            .insert(remote.as_str().to_string(), item.clone());
        debug!(
            remote = %remote,
            size = state.size,
            pinned = item.is_pinned(),
            "File cached for offline access"
        );
        Ok(item)
    }

    /// Unpins and evicts one cached file
    pub async fn remove_from_offline(&self, remote: &RemotePath) -> anyhow::Result<()> {
        if let Some((_, item)) = self.entries.remove(remote.as_str()) {
            self.filesystem.delete_file(&item.cache_path).await?;
            debug!(remote = %remote, "Cache entry removed");
        }
        Ok(())
    }

    /// Backing file for a cached remote, bumping its LRU key
    pub fn open_cached(&self, remote: &RemotePath) -> Option<LocalPath> {
        self.entries.get_mut(remote.as_str()).map(|mut item| {
            item.touch();
            item.cache_path.clone()
        })
    }

    /// Current index record for a remote, if cached
    pub fn entry(&self, remote: &RemotePath) -> Option<OfflineCacheItem> {
        self.entries.get(remote.as_str()).map(|e| e.clone())
    }

    /// Bytes currently held in the cache
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts oldest-accessed evictable entries until usage is at or
    /// below `capacity x threshold`
    ///
    /// A no-op when usage is already under the target. Pinned entries are
    /// never touched, so usage can stay above the target if pins alone
    /// exceed it.
    ///
    /// # Returns
    /// Bytes evicted.
    pub async fn cleanup_cache(&self, threshold: f64) -> anyhow::Result<u64> {
        let target = (self.capacity_bytes as f64 * threshold.clamp(0.0, 1.0)) as u64;
        let mut total = self.total_bytes();
        if total <= target {
            return Ok(0);
        }

        let mut evictable: Vec<OfflineCacheItem> = self
            .entries
            .iter()
            .filter(|e| !e.is_pinned())
            .map(|e| e.clone())
            .collect();
        evictable.sort_by_key(|e| e.last_accessed);

        let mut evicted_bytes = 0u64;
        for item in evictable {
            if total <= target {
                break;
            }
            self.entries.remove(item.remote_path.as_str());
            self.filesystem.delete_file(&item.cache_path).await?;
            total = total.saturating_sub(item.size_bytes);
            evicted_bytes += item.size_bytes;
            debug!(remote = %item.remote_path, size = item.size_bytes, "Cache entry evicted");
        }

        info!(
            evicted_bytes,
            remaining_bytes = total,
            target_bytes = target,
            "Cache cleanup finished"
        );
        Ok(evicted_bytes)
    }

    /// Drops index entries whose backing file is missing or truncated
    ///
    /// # Returns
    /// The remote paths that were dropped.
    pub async fn validate_cache_integrity(&self) -> anyhow::Result<Vec<RemotePath>> {
        let snapshot: Vec<OfflineCacheItem> =
            self.entries.iter().map(|e| e.clone()).collect();
        let mut dropped = Vec::new();

        for item in snapshot {
            let state = self.filesystem.get_state(&item.cache_path).await?;
            if state.is_regular_file() && state.size == item.size_bytes {
                continue;
            }
            warn!(
                remote = %item.remote_path,
                expected = item.size_bytes,
                found = state.size,
                exists = state.exists,
                "Cache backing file invalid, dropping entry"
            );
            self.entries.remove(item.remote_path.as_str());
            if state.exists {
                self.filesystem.delete_file(&item.cache_path).await?;
            }
            dropped.push(item.remote_path);
        }
        Ok(dropped)
    }

    /// Evicts entries whose remote file no longer exists
    ///
    /// # Returns
    /// The remote paths that were evicted.
    pub async fn sync_cache_state(&self) -> anyhow::Result<Vec<RemotePath>> {
        let snapshot: Vec<OfflineCacheItem> =
            self.entries.iter().map(|e| e.clone()).collect();
        let mut evicted = Vec::new();

        for item in snapshot {
            match self.transport.get_file_info(&item.remote_path).await {
                Ok(_) => {}
                Err(e)
                    if matches!(e.downcast_ref::<SyncError>(), Some(SyncError::NotFound(_))) =>
                {
                    debug!(remote = %item.remote_path, "Remote gone, evicting cache entry");
                    self.entries.remove(item.remote_path.as_str());
                    self.filesystem.delete_file(&item.cache_path).await?;
                    evicted.push(item.remote_path);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(evicted)
    }

    // Backing name is the SHA-256 of the remote path, so remote names can
    // never traverse out of the cache directory
    fn backing_path(&self, remote: &RemotePath) -> anyhow::Result<LocalPath> {
        let digest = format!("{:x}", Sha256::digest(remote.as_str().as_bytes()));
        Ok(self.cache_dir.join(digest)?)
    }
}
