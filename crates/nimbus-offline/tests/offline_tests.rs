//! Integration tests for the offline journal and cache
//!
//! Uses mock transport and filesystem adapters so replay ordering and
//! eviction decisions can be observed directly.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use nimbus_core::domain::{
    CachePriority, ChangeCursor, ContentHash, ItemKind, LocalPath, ModificationKind,
    OfflineModification, RemotePath, SyncError,
};
use nimbus_core::ports::{
    ChangeSet, FileSystemState, ICloudTransport, ILocalFileSystem, ProgressFn, RemoteItem,
    WatchHandle,
};
use nimbus_offline::{OfflineCache, OfflineQueue};

// ============================================================================
// Mocks
// ============================================================================

#[derive(Default)]
struct MockFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<HashSet<PathBuf>>,
}

impl MockFs {
    fn seed_file(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), data.to_vec());
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(&PathBuf::from(path));
    }

    fn has_file(&self, path: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .contains_key(&PathBuf::from(path))
    }
}

#[async_trait]
impl ILocalFileSystem for MockFs {
    async fn read_file(&self, path: &LocalPath) -> anyhow::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path.as_path())
            .cloned()
            .ok_or_else(|| anyhow::Error::new(SyncError::NotFound(path.to_string())))
    }

    async fn write_file(&self, path: &LocalPath, data: &[u8]) -> anyhow::Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.as_path().to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn delete_file(&self, path: &LocalPath) -> anyhow::Result<()> {
        self.files.lock().unwrap().remove(path.as_path());
        Ok(())
    }

    async fn delete_directory(&self, path: &LocalPath) -> anyhow::Result<()> {
        self.dirs.lock().unwrap().remove(path.as_path());
        Ok(())
    }

    async fn move_entry(&self, from: &LocalPath, to: &LocalPath) -> anyhow::Result<()> {
        let mut files = self.files.lock().unwrap();
        if let Some(data) = files.remove(from.as_path()) {
            files.insert(to.as_path().to_path_buf(), data);
            Ok(())
        } else {
            Err(anyhow::Error::new(SyncError::NotFound(from.to_string())))
        }
    }

    async fn copy_file(&self, from: &LocalPath, to: &LocalPath) -> anyhow::Result<()> {
        let data = self.read_file(from).await?;
        self.write_file(to, &data).await
    }

    async fn get_state(&self, path: &LocalPath) -> anyhow::Result<FileSystemState> {
        if let Some(data) = self.files.lock().unwrap().get(path.as_path()) {
            return Ok(FileSystemState {
                exists: true,
                is_file: true,
                size: data.len() as u64,
                modified: Some(Utc::now()),
            });
        }
        if self.dirs.lock().unwrap().contains(path.as_path()) {
            return Ok(FileSystemState {
                exists: true,
                is_file: false,
                size: 0,
                modified: Some(Utc::now()),
            });
        }
        Ok(FileSystemState::not_found())
    }

    async fn compute_hash(&self, path: &LocalPath) -> anyhow::Result<ContentHash> {
        let data = self.read_file(path).await?;
        Ok(ContentHash::new(format!("{:08x}", data.len()))?)
    }

    async fn create_directory(&self, path: &LocalPath) -> anyhow::Result<()> {
        self.dirs
            .lock()
            .unwrap()
            .insert(path.as_path().to_path_buf());
        Ok(())
    }

    async fn list_directory(&self, _path: &LocalPath) -> anyhow::Result<Vec<LocalPath>> {
        Ok(Vec::new())
    }

    async fn available_space(&self, _path: &LocalPath) -> anyhow::Result<u64> {
        Ok(u64::MAX)
    }

    async fn watch(&self, _path: &LocalPath) -> anyhow::Result<WatchHandle> {
        Ok(WatchHandle::new(|| {}))
    }
}

#[derive(Default)]
struct MockTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    folders: Mutex<HashSet<String>>,
    ops: Mutex<Vec<String>>,
    fail_with: Mutex<Option<SyncError>>,
    fs: Mutex<Option<Arc<MockFs>>>,
}

impl MockTransport {
    fn with_fs(fs: Arc<MockFs>) -> Self {
        let t = Self::default();
        *t.fs.lock().unwrap() = Some(fs);
        t
    }

    fn seed_file(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
    }

    fn remove_file(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn fail_with(&self, error: Option<SyncError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn check_failure(&self) -> anyhow::Result<()> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(anyhow::Error::new(err));
        }
        Ok(())
    }

    fn log(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn item_for(path: &str, size: u64) -> RemoteItem {
        RemoteItem {
            path: RemotePath::new(path).unwrap(),
            name: path.rsplit('/').next().unwrap().to_string(),
            kind: ItemKind::File,
            size_bytes: size,
            modified_at: Utc::now(),
            hash: None,
        }
    }
}

#[async_trait]
impl ICloudTransport for MockTransport {
    async fn upload_file(
        &self,
        local: &LocalPath,
        remote: &RemotePath,
        _on_progress: ProgressFn,
    ) -> anyhow::Result<RemoteItem> {
        self.check_failure()?;
        let fs = self.fs.lock().unwrap().clone().expect("fs attached");
        let data = fs.read_file(local).await?;
        let size = data.len() as u64;
        self.files
            .lock()
            .unwrap()
            .insert(remote.as_str().to_string(), data);
        self.log(format!("upload {remote}"));
        Ok(Self::item_for(remote.as_str(), size))
    }

    async fn download_file(
        &self,
        remote: &RemotePath,
        local: &LocalPath,
        _on_progress: ProgressFn,
    ) -> anyhow::Result<()> {
        self.check_failure()?;
        let data = self
            .files
            .lock()
            .unwrap()
            .get(remote.as_str())
            .cloned()
            .ok_or_else(|| anyhow::Error::new(SyncError::NotFound(remote.to_string())))?;
        let fs = self.fs.lock().unwrap().clone().expect("fs attached");
        fs.write_file(local, &data).await
    }

    async fn delete_file(&self, remote: &RemotePath) -> anyhow::Result<()> {
        self.check_failure()?;
        self.files.lock().unwrap().remove(remote.as_str());
        self.log(format!("delete_file {remote}"));
        Ok(())
    }

    async fn delete_folder(&self, remote: &RemotePath) -> anyhow::Result<()> {
        self.check_failure()?;
        self.folders.lock().unwrap().remove(remote.as_str());
        self.log(format!("delete_folder {remote}"));
        Ok(())
    }

    async fn move_item(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<()> {
        self.check_failure()?;
        let mut files = self.files.lock().unwrap();
        if let Some(data) = files.remove(from.as_str()) {
            files.insert(to.as_str().to_string(), data);
        }
        self.log(format!("move {from} {to}"));
        Ok(())
    }

    async fn copy_file(&self, from: &RemotePath, to: &RemotePath) -> anyhow::Result<()> {
        self.check_failure()?;
        let data = self
            .files
            .lock()
            .unwrap()
            .get(from.as_str())
            .cloned()
            .ok_or_else(|| anyhow::Error::new(SyncError::NotFound(from.to_string())))?;
        self.files
            .lock()
            .unwrap()
            .insert(to.as_str().to_string(), data);
        Ok(())
    }

    async fn create_folder(&self, remote: &RemotePath) -> anyhow::Result<()> {
        self.check_failure()?;
        self.folders
            .lock()
            .unwrap()
            .insert(remote.as_str().to_string());
        self.log(format!("create_folder {remote}"));
        Ok(())
    }

    async fn list_folder(&self, _remote: &RemotePath) -> anyhow::Result<Vec<RemoteItem>> {
        Ok(Vec::new())
    }

    async fn get_file_info(&self, remote: &RemotePath) -> anyhow::Result<RemoteItem> {
        self.files
            .lock()
            .unwrap()
            .get(remote.as_str())
            .map(|d| Self::item_for(remote.as_str(), d.len() as u64))
            .ok_or_else(|| anyhow::Error::new(SyncError::NotFound(remote.to_string())))
    }

    async fn get_folder_info(&self, remote: &RemotePath) -> anyhow::Result<RemoteItem> {
        if self.folders.lock().unwrap().contains(remote.as_str()) {
            Ok(RemoteItem {
                path: remote.clone(),
                name: remote.name().unwrap_or("").to_string(),
                kind: ItemKind::Folder,
                size_bytes: 0,
                modified_at: Utc::now(),
                hash: None,
            })
        } else {
            Err(anyhow::Error::new(SyncError::NotFound(remote.to_string())))
        }
    }

    async fn get_changes(&self, _cursor: Option<&ChangeCursor>) -> anyhow::Result<ChangeSet> {
        Ok(ChangeSet {
            changes: Vec::new(),
            next_cursor: ChangeCursor::new("mock-cursor").unwrap(),
        })
    }
}

// ============================================================================
// Queue harness
// ============================================================================

fn queue_harness() -> (Arc<MockFs>, Arc<MockTransport>, OfflineQueue) {
    let fs = Arc::new(MockFs::default());
    let transport = Arc::new(MockTransport::with_fs(fs.clone()));
    let queue = OfflineQueue::new(
        LocalPath::new("/sync").unwrap(),
        transport.clone(),
        fs.clone(),
        24,
    );
    (fs, transport, queue)
}

fn modification(path: &str, kind: ModificationKind, age_secs: i64) -> OfflineModification {
    OfflineModification {
        path: LocalPath::new(path).unwrap(),
        kind,
        timestamp: Utc::now() - Duration::seconds(age_secs),
        attempts: 0,
    }
}

// ============================================================================
// Queue tests
// ============================================================================

#[tokio::test]
async fn test_replay_follows_timestamp_order_not_insertion_order() {
    let (fs, transport, queue) = queue_harness();
    fs.seed_file("/sync/newer.txt", b"n");
    fs.seed_file("/sync/older.txt", b"o");

    // Inserted newest first; replay must still run oldest first
    queue
        .record(modification("/sync/newer.txt", ModificationKind::Modified, 10))
        .await
        .unwrap();
    queue
        .record(modification("/sync/older.txt", ModificationKind::Created, 60))
        .await
        .unwrap();

    queue.set_online(true);
    let report = queue.replay().await;
    assert_eq!(report.replayed, 2);
    assert_eq!(
        transport.ops(),
        vec!["upload /older.txt".to_string(), "upload /newer.txt".to_string()]
    );
}

#[tokio::test]
async fn test_modified_then_deleted_nets_out_to_deleted() {
    let (_fs, transport, queue) = queue_harness();
    transport.seed_file("/a.txt", b"old");

    // The file was modified, then deleted; it no longer exists locally
    queue
        .record(modification("/sync/a.txt", ModificationKind::Modified, 60))
        .await
        .unwrap();
    queue
        .record(modification("/sync/a.txt", ModificationKind::Deleted, 10))
        .await
        .unwrap();

    queue.set_online(true);
    let report = queue.replay().await;

    // The modify can no longer be applied (local file gone) and is
    // dropped; the delete goes through
    assert_eq!(report.replayed, 1);
    assert_eq!(report.dropped, 1);
    assert!(!transport.has_file("/a.txt"));
}

#[tokio::test]
async fn test_records_past_the_horizon_are_dropped() {
    let (fs, _transport, queue) = queue_harness();
    fs.seed_file("/sync/a.txt", b"x");

    queue
        .record(modification(
            "/sync/a.txt",
            ModificationKind::Modified,
            25 * 3600,
        ))
        .await
        .unwrap();

    queue.set_online(true);
    let report = queue.replay().await;
    assert_eq!(report.dropped, 1);
    assert_eq!(report.replayed, 0);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_retryable_failure_keeps_the_record() {
    let (fs, transport, queue) = queue_harness();
    fs.seed_file("/sync/a.txt", b"x");

    queue
        .record(modification("/sync/a.txt", ModificationKind::Modified, 10))
        .await
        .unwrap();

    queue.set_online(true);
    transport.fail_with(Some(SyncError::NetworkUnavailable));
    let report = queue.replay().await;
    assert_eq!(report.kept, 1);
    assert_eq!(queue.pending(), 1);

    transport.fail_with(None);
    let report = queue.replay().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(queue.pending(), 0);
    assert!(transport.has_file("/a.txt"));
}

#[tokio::test]
async fn test_conflict_during_replay_is_retryable() {
    let (fs, transport, queue) = queue_harness();
    fs.seed_file("/sync/a.txt", b"x");

    queue
        .record(modification("/sync/a.txt", ModificationKind::Modified, 10))
        .await
        .unwrap();

    queue.set_online(true);
    transport.fail_with(Some(SyncError::Conflict("remote changed too".into())));
    let report = queue.replay().await;
    assert_eq!(report.kept, 1);
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn test_record_while_online_applies_immediately() {
    let (fs, transport, queue) = queue_harness();
    fs.seed_file("/sync/a.txt", b"x");
    queue.set_online(true);

    queue
        .record(modification("/sync/a.txt", ModificationKind::Created, 0))
        .await
        .unwrap();

    assert_eq!(queue.pending(), 0);
    assert!(transport.has_file("/a.txt"));
}

#[tokio::test]
async fn test_delete_of_already_missing_remote_is_a_noop() {
    let (_fs, _transport, queue) = queue_harness();

    queue
        .record(modification("/sync/gone.txt", ModificationKind::Deleted, 10))
        .await
        .unwrap();

    queue.set_online(true);
    let report = queue.replay().await;
    assert_eq!(report.replayed, 1);
}

#[tokio::test]
async fn test_rename_maps_to_remote_move() {
    let (fs, transport, queue) = queue_harness();
    fs.seed_file("/sync/new.txt", b"x");
    transport.seed_file("/old.txt", b"x");

    queue
        .record(modification(
            "/sync/new.txt",
            ModificationKind::Renamed {
                old_name: "old.txt".to_string(),
            },
            10,
        ))
        .await
        .unwrap();

    queue.set_online(true);
    let report = queue.replay().await;
    assert_eq!(report.replayed, 1);
    assert!(transport.has_file("/new.txt"));
    assert!(!transport.has_file("/old.txt"));
}

// ============================================================================
// Cache tests
// ============================================================================

fn cache_harness(capacity: u64) -> (Arc<MockFs>, Arc<MockTransport>, OfflineCache) {
    let fs = Arc::new(MockFs::default());
    let transport = Arc::new(MockTransport::with_fs(fs.clone()));
    let cache = OfflineCache::new(
        LocalPath::new("/cache").unwrap(),
        capacity,
        transport.clone(),
        fs.clone(),
    );
    (fs, transport, cache)
}

#[tokio::test]
async fn test_make_available_offline_pins_the_file() {
    let (fs, transport, cache) = cache_harness(10_240);
    transport.seed_file("/docs/r.pdf", &[1u8; 512]);

    let remote = RemotePath::new("/docs/r.pdf").unwrap();
    let item = cache.make_available_offline(&remote).await.unwrap();

    assert!(item.is_pinned());
    assert_eq!(item.size_bytes, 512);
    assert!(fs.has_file(&item.cache_path.to_string()));
    assert_eq!(cache.total_bytes(), 512);
}

#[tokio::test]
async fn test_cleanup_evicts_oldest_accessed_down_to_threshold() {
    let (_fs, transport, cache) = cache_harness(10_240);

    // Fill to 90% with nine evictable 1 KiB entries
    for i in 0..9 {
        let path = format!("/f{i}.bin");
        transport.seed_file(&path, &[0u8; 1024]);
        cache
            .cache_file(
                &RemotePath::new(path).unwrap(),
                CachePriority::Evictable,
            )
            .await
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert_eq!(cache.total_bytes(), 9 * 1024);

    // Target is 80% of 10 KiB = 8192 bytes; one eviction suffices
    let evicted = cache.cleanup_cache(0.8).await.unwrap();
    assert_eq!(evicted, 1024);
    assert_eq!(cache.total_bytes(), 8 * 1024);

    // The oldest-accessed entry went first
    assert!(cache.entry(&RemotePath::new("/f0.bin").unwrap()).is_none());
    assert!(cache.entry(&RemotePath::new("/f8.bin").unwrap()).is_some());
}

#[tokio::test]
async fn test_cleanup_never_touches_pinned_entries() {
    let (_fs, transport, cache) = cache_harness(2048);
    transport.seed_file("/pinned.bin", &[0u8; 1024]);
    transport.seed_file("/loose.bin", &[0u8; 1024]);

    cache
        .make_available_offline(&RemotePath::new("/pinned.bin").unwrap())
        .await
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    cache
        .cache_file(
            &RemotePath::new("/loose.bin").unwrap(),
            CachePriority::Evictable,
        )
        .await
        .unwrap();

    // Even an aggressive cleanup leaves the pinned entry in place,
    // although it is the oldest
    cache.cleanup_cache(0.1).await.unwrap();
    assert!(cache
        .entry(&RemotePath::new("/pinned.bin").unwrap())
        .is_some());
    assert!(cache
        .entry(&RemotePath::new("/loose.bin").unwrap())
        .is_none());
}

#[tokio::test]
async fn test_cleanup_is_a_noop_under_the_target() {
    let (_fs, transport, cache) = cache_harness(10_240);
    transport.seed_file("/f.bin", &[0u8; 1024]);
    cache
        .cache_file(&RemotePath::new("/f.bin").unwrap(), CachePriority::Evictable)
        .await
        .unwrap();

    assert_eq!(cache.cleanup_cache(0.8).await.unwrap(), 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_validate_integrity_drops_missing_backing_files() {
    let (fs, transport, cache) = cache_harness(10_240);
    transport.seed_file("/a.bin", &[0u8; 100]);
    let remote = RemotePath::new("/a.bin").unwrap();
    let item = cache.make_available_offline(&remote).await.unwrap();

    // The backing file disappears behind the cache's back
    fs.remove(&item.cache_path.to_string());

    let dropped = cache.validate_cache_integrity().await.unwrap();
    assert_eq!(dropped, vec![remote.clone()]);
    assert!(cache.entry(&remote).is_none());
}

#[tokio::test]
async fn test_sync_cache_state_evicts_entries_whose_remote_is_gone() {
    let (_fs, transport, cache) = cache_harness(10_240);
    transport.seed_file("/keep.bin", &[0u8; 100]);
    transport.seed_file("/gone.bin", &[0u8; 100]);

    cache
        .make_available_offline(&RemotePath::new("/keep.bin").unwrap())
        .await
        .unwrap();
    cache
        .make_available_offline(&RemotePath::new("/gone.bin").unwrap())
        .await
        .unwrap();

    transport.remove_file("/gone.bin");

    let evicted = cache.sync_cache_state().await.unwrap();
    assert_eq!(evicted, vec![RemotePath::new("/gone.bin").unwrap()]);
    assert!(cache
        .entry(&RemotePath::new("/keep.bin").unwrap())
        .is_some());
}

#[tokio::test]
async fn test_remove_from_offline_deletes_backing_file() {
    let (fs, transport, cache) = cache_harness(10_240);
    transport.seed_file("/a.bin", &[0u8; 100]);
    let remote = RemotePath::new("/a.bin").unwrap();
    let item = cache.make_available_offline(&remote).await.unwrap();

    cache.remove_from_offline(&remote).await.unwrap();
    assert!(cache.entry(&remote).is_none());
    assert!(!fs.has_file(&item.cache_path.to_string()));
}
