//! Conflict detection and classification
//!
//! A conflict exists only if the two sides' modification timestamps differ
//! by more than a 1-second tolerance (clock-skew and filesystem-precision
//! guard) AND at least one observable property diverges. Classification
//! checks in a fixed order and the first match wins:
//!
//! 1. kind mismatch (file vs. folder) → `type`
//! 2. name mismatch → `name`
//! 3. content-hash mismatch, files only → `content`
//!
//! A kind mismatch makes comparing names or hashes meaningless, and a
//! renamed item must not also be reported as content-conflicting on the
//! same pass.

use chrono::Duration;
use tracing::debug;

use nimbus_core::domain::{ConflictInfo, ConflictType, ItemKind, VersionInfo};

/// Timestamp tolerance below which the replicas are considered unchanged
pub const MTIME_TOLERANCE_SECS: i64 = 1;

/// Stateless conflict detector
///
/// Holds no configuration; the tolerance is a fixed engine constant so
/// detection is deterministic across hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detects and classifies a divergence between two replica snapshots
    ///
    /// Returns `None` when the replicas agree (or their timestamps are
    /// within tolerance, which is treated as "no real change").
    pub fn detect(&self, local: &VersionInfo, remote: &VersionInfo) -> Option<ConflictInfo> {
        let delta = (local.modified_at - remote.modified_at).abs();
        if delta <= Duration::seconds(MTIME_TOLERANCE_SECS) {
            return None;
        }

        let conflict_type = self.classify(local, remote)?;

        debug!(
            conflict_type = %conflict_type,
            local_name = %local.name,
            remote_name = %remote.name,
            delta_secs = delta.num_seconds(),
            "Conflict detected"
        );

        Some(ConflictInfo::new(conflict_type, local.clone(), remote.clone()))
    }

    /// First matching rule wins; later rules are not evaluated
    fn classify(&self, local: &VersionInfo, remote: &VersionInfo) -> Option<ConflictType> {
        if local.kind != remote.kind {
            return Some(ConflictType::Type);
        }
        if local.name != remote.name {
            return Some(ConflictType::Name);
        }
        if local.kind == ItemKind::File {
            if let (Some(local_hash), Some(remote_hash)) = (&local.hash, &remote.hash) {
                if local_hash != remote_hash {
                    return Some(ConflictType::Content);
                }
            }
        }
        None
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use nimbus_core::domain::ContentHash;

    use super::*;

    fn version(
        name: &str,
        kind: ItemKind,
        hash: Option<&str>,
        offset_secs: i64,
    ) -> VersionInfo {
        VersionInfo {
            name: name.to_string(),
            kind,
            size_bytes: 100,
            modified_at: Utc::now() + Duration::seconds(offset_secs),
            hash: hash.map(|h| ContentHash::new(h).unwrap()),
        }
    }

    #[test]
    fn test_identical_replicas_no_conflict() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, Some("aa11"), 0);
        let remote = version("a.txt", ItemKind::File, Some("aa11"), 0);
        assert!(d.detect(&local, &remote).is_none());
    }

    #[test]
    fn test_within_tolerance_is_no_change_even_with_hash_mismatch() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, Some("aa11"), 0);
        let remote = version("a.txt", ItemKind::File, Some("bb22"), 1);
        // 1s apart is within tolerance: treated as clock skew, not change
        assert!(d.detect(&local, &remote).is_none());
    }

    #[test]
    fn test_content_conflict_outside_tolerance() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, Some("aa11"), 0);
        let remote = version("a.txt", ItemKind::File, Some("bb22"), 10);
        let info = d.detect(&local, &remote).expect("conflict");
        assert_eq!(info.conflict_type, ConflictType::Content);
    }

    #[test]
    fn test_name_takes_precedence_over_content() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, Some("aa11"), 0);
        let remote = version("b.txt", ItemKind::File, Some("bb22"), 10);
        let info = d.detect(&local, &remote).expect("conflict");
        assert_eq!(info.conflict_type, ConflictType::Name);
    }

    #[test]
    fn test_type_takes_precedence_over_name_and_content() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, Some("aa11"), 0);
        let remote = version("b.txt", ItemKind::Folder, None, 10);
        let info = d.detect(&local, &remote).expect("conflict");
        assert_eq!(info.conflict_type, ConflictType::Type);
    }

    #[test]
    fn test_folders_never_content_conflict() {
        let d = ConflictDetector::new();
        let local = version("docs", ItemKind::Folder, None, 0);
        let remote = version("docs", ItemKind::Folder, None, 60);
        // Same kind, same name, no hashes: timestamps alone are not a conflict
        assert!(d.detect(&local, &remote).is_none());
    }

    #[test]
    fn test_missing_hash_means_no_content_conflict() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, None, 0);
        let remote = version("a.txt", ItemKind::File, Some("bb22"), 10);
        assert!(d.detect(&local, &remote).is_none());
    }

    #[test]
    fn test_snapshots_are_captured_in_info() {
        let d = ConflictDetector::new();
        let local = version("a.txt", ItemKind::File, Some("aa11"), 0);
        let remote = version("a.txt", ItemKind::File, Some("bb22"), 10);
        let info = d.detect(&local, &remote).unwrap();
        assert_eq!(info.local.hash.as_ref().unwrap().as_str(), "aa11");
        assert_eq!(info.remote.hash.as_ref().unwrap().as_str(), "bb22");
    }
}
