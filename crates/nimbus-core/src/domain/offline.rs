//! Offline-mode records: queued modifications and cached remote files
//!
//! While disconnected, local changes are journaled as
//! [`OfflineModification`]s and replayed in timestamp order on reconnect.
//! Remote files pulled down for offline access are tracked as
//! [`OfflineCacheItem`]s in a bounded, LRU-evicted cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{LocalPath, RemotePath};

// ============================================================================
// ModificationKind
// ============================================================================

/// The five kinds of local change that can be journaled offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModificationKind {
    /// A new file or folder appeared
    Created,
    /// An existing file's content changed
    Modified,
    /// The entry was removed
    Deleted,
    /// The entry kept its directory but changed name
    Renamed { old_name: String },
    /// The entry moved to a different directory
    Moved { old_path: LocalPath },
}

impl ModificationKind {
    /// Stable lowercase name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed { .. } => "renamed",
            Self::Moved { .. } => "moved",
        }
    }
}

// ============================================================================
// OfflineModification
// ============================================================================

/// One journaled local change awaiting replay against the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineModification {
    /// Local path the change applies to
    pub path: LocalPath,
    /// What happened
    pub kind: ModificationKind,
    /// When the change was observed; replay order key
    pub timestamp: DateTime<Utc>,
    /// How many replay passes have already failed on this record
    pub attempts: u32,
}

impl OfflineModification {
    /// Journals a change observed right now
    pub fn new(path: LocalPath, kind: ModificationKind) -> Self {
        Self {
            path,
            kind,
            timestamp: Utc::now(),
            attempts: 0,
        }
    }

    /// Whether this record has aged past the given retry horizon
    pub fn is_expired(&self, horizon: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp > horizon
    }
}

// ============================================================================
// CachePriority / OfflineCacheItem
// ============================================================================

/// Eviction class of a cached file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    /// Explicitly kept offline by the user; never evicted
    Pinned,
    /// Opportunistically cached; evicted oldest-accessed first
    Evictable,
}

/// A remote file held locally for offline access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineCacheItem {
    /// Remote path this cache entry mirrors
    pub remote_path: RemotePath,
    /// Backing file inside the cache directory
    pub cache_path: LocalPath,
    /// Size of the backing file in bytes
    pub size_bytes: u64,
    /// Pinned entries survive every cleanup
    pub priority: CachePriority,
    /// LRU key: bumped on every read
    pub last_accessed: DateTime<Utc>,
}

impl OfflineCacheItem {
    /// Creates a cache record for a file written just now
    pub fn new(
        remote_path: RemotePath,
        cache_path: LocalPath,
        size_bytes: u64,
        priority: CachePriority,
    ) -> Self {
        Self {
            remote_path,
            cache_path,
            size_bytes,
            priority,
            last_accessed: Utc::now(),
        }
    }

    /// Marks the entry as just used
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    pub fn is_pinned(&self) -> bool {
        self.priority == CachePriority::Pinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_uses_horizon() {
        let m = OfflineModification {
            path: LocalPath::new("/sync/a.txt").unwrap(),
            kind: ModificationKind::Modified,
            timestamp: Utc::now() - chrono::Duration::hours(25),
            attempts: 0,
        };
        assert!(m.is_expired(chrono::Duration::hours(24), Utc::now()));

        let fresh = OfflineModification::new(
            LocalPath::new("/sync/b.txt").unwrap(),
            ModificationKind::Created,
        );
        assert!(!fresh.is_expired(chrono::Duration::hours(24), Utc::now()));
    }

    #[test]
    fn test_modification_kind_serde_is_tagged() {
        let kind = ModificationKind::Renamed {
            old_name: "old.txt".into(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"kind\":\"renamed\""));
        assert!(json.contains("old.txt"));
    }

    #[test]
    fn test_touch_advances_lru_key() {
        let mut item = OfflineCacheItem::new(
            RemotePath::new("/a.txt").unwrap(),
            LocalPath::new("/cache/ab12").unwrap(),
            10,
            CachePriority::Evictable,
        );
        let before = item.last_accessed;
        std::thread::sleep(std::time::Duration::from_millis(5));
        item.touch();
        assert!(item.last_accessed > before);
    }

    #[test]
    fn test_pinned_predicate() {
        let item = OfflineCacheItem::new(
            RemotePath::new("/a.txt").unwrap(),
            LocalPath::new("/cache/ab12").unwrap(),
            10,
            CachePriority::Pinned,
        );
        assert!(item.is_pinned());
    }
}
