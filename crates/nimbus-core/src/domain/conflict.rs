//! Conflict model: classification, version snapshots, and resolutions
//!
//! A conflict is a detected, unresolved divergence between the local and
//! remote replicas of one item. The conflict engine classifies each
//! divergence into exactly one [`ConflictType`] and attaches a
//! [`ConflictInfo`] to the item; a successful resolution clears it.
//!
//! ## Classification precedence
//!
//! `Type > Name > Content`, first match wins. A kind mismatch makes name or
//! hash comparison meaningless, and a renamed item must not also be
//! reported as content-conflicting on the same pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    newtypes::ContentHash,
    sync_item::ItemKind,
};

// ============================================================================
// ConflictType
// ============================================================================

/// What kind of divergence was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// File content differs on both sides (files only)
    Content,
    /// Display name differs between the replicas
    Name,
    /// One side is a file, the other a folder
    Type,
}

impl ConflictType {
    /// Stable lowercase name, used in logs and the database
    pub fn name(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Name => "name",
            Self::Type => "type",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// VersionInfo
// ============================================================================

/// Snapshot of one replica's observable state at detection time
///
/// Captured for both sides when a conflict is created, so resolution
/// decisions (and strategy auto-selection) work from a consistent picture
/// even if either replica changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Display name of this replica
    pub name: String,
    /// File or folder
    pub kind: ItemKind,
    /// Size in bytes (not authoritative for folders)
    pub size_bytes: u64,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    /// Content hash, files only
    pub hash: Option<ContentHash>,
}

// ============================================================================
// Resolution
// ============================================================================

/// A concrete action that resolves a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Push local content to the remote
    KeepLocal,
    /// Pull remote content over the local copy
    KeepCloud,
    /// Preserve local edits in a conflicted-copy sibling, then pull remote
    KeepBoth,
    /// Shallow union of children; folders only
    Merge,
}

impl Resolution {
    /// Stable lowercase name, used in logs and configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepCloud => "keep_cloud",
            Self::KeepBoth => "keep_both",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// ConflictStrategy
// ============================================================================

/// Policy-level strategy for resolving conflicts without user input
///
/// `AskUser` never auto-resolves: batch operations under it skip the item
/// and leave it in conflict state for explicit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Leave the conflict for explicit user resolution
    AskUser,
    /// Always keep the local replica
    KeepLocal,
    /// Always keep the remote replica
    KeepCloud,
    /// Always preserve both replicas
    KeepBoth,
    /// Keep whichever side was modified more recently (tie: local)
    KeepNewer,
    /// Keep whichever side is larger (tie: local)
    KeepLarger,
}

impl ConflictStrategy {
    /// Stable lowercase name, used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            Self::AskUser => "ask_user",
            Self::KeepLocal => "keep_local",
            Self::KeepCloud => "keep_cloud",
            Self::KeepBoth => "keep_both",
            Self::KeepNewer => "keep_newer",
            Self::KeepLarger => "keep_larger",
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = super::errors::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ask_user" => Ok(Self::AskUser),
            "keep_local" => Ok(Self::KeepLocal),
            "keep_cloud" => Ok(Self::KeepCloud),
            "keep_both" => Ok(Self::KeepBoth),
            "keep_newer" => Ok(Self::KeepNewer),
            "keep_larger" => Ok(Self::KeepLarger),
            other => Err(super::errors::DomainError::ValidationFailed {
                field: "conflict_strategy".to_string(),
                message: format!("unknown strategy '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// ConflictInfo
// ============================================================================

/// Full description of one unresolved conflict
///
/// Attached to a [`SyncItem`](super::sync_item::SyncItem) while its state is
/// `Conflict`; cleared by a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Classification of the divergence
    pub conflict_type: ConflictType,
    /// Local replica snapshot at detection time
    pub local: VersionInfo,
    /// Remote replica snapshot at detection time
    pub remote: VersionInfo,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    /// Creates a new conflict descriptor, stamped with the current time
    pub fn new(conflict_type: ConflictType, local: VersionInfo, remote: VersionInfo) -> Self {
        Self {
            conflict_type,
            local,
            remote,
            detected_at: Utc::now(),
        }
    }

    /// Resolutions that are legal for this conflict
    ///
    /// `Merge` is only offered when both replicas are folders; everything
    /// else accepts the three keep variants.
    pub fn legal_resolutions(&self) -> Vec<Resolution> {
        let mut options = vec![Resolution::KeepLocal, Resolution::KeepCloud, Resolution::KeepBoth];
        if self.local.kind == ItemKind::Folder && self.remote.kind == ItemKind::Folder {
            options.push(Resolution::Merge);
        }
        options
    }

    /// Whether `resolution` may be applied to this conflict
    pub fn allows(&self, resolution: Resolution) -> bool {
        self.legal_resolutions().contains(&resolution)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn version(kind: ItemKind, size: u64) -> VersionInfo {
        VersionInfo {
            name: "a.txt".to_string(),
            kind,
            size_bytes: size,
            modified_at: Utc::now(),
            hash: None,
        }
    }

    #[test]
    fn test_merge_only_for_folder_pairs() {
        let folders = ConflictInfo::new(
            ConflictType::Name,
            version(ItemKind::Folder, 0),
            version(ItemKind::Folder, 0),
        );
        assert!(folders.allows(Resolution::Merge));

        let files = ConflictInfo::new(
            ConflictType::Content,
            version(ItemKind::File, 10),
            version(ItemKind::File, 20),
        );
        assert!(!files.allows(Resolution::Merge));

        let mixed = ConflictInfo::new(
            ConflictType::Type,
            version(ItemKind::File, 10),
            version(ItemKind::Folder, 0),
        );
        assert!(!mixed.allows(Resolution::Merge));
    }

    #[test]
    fn test_keep_variants_always_legal() {
        let info = ConflictInfo::new(
            ConflictType::Type,
            version(ItemKind::File, 1),
            version(ItemKind::Folder, 0),
        );
        assert!(info.allows(Resolution::KeepLocal));
        assert!(info.allows(Resolution::KeepCloud));
        assert!(info.allows(Resolution::KeepBoth));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "keep_newer".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::KeepNewer
        );
        assert_eq!(
            "ask_user".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::AskUser
        );
        assert!("coin_flip".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ConflictType::Content).unwrap();
        assert_eq!(json, "\"content\"");
        let json = serde_json::to_string(&Resolution::KeepBoth).unwrap();
        assert_eq!(json, "\"keep_both\"");
    }
}
