//! SyncItem entity and its state machine
//!
//! A [`SyncItem`] is the tracked unit of synchronization: exactly one per
//! (local path, remote path) pair. The metadata store owns the authoritative
//! copy; the engine and conflict resolver hold transient clones while
//! processing.
//!
//! ## State machine
//!
//! ```text
//!   local-only ──→ uploading ──→ synced ──→ local-only / cloud-only
//!   cloud-only ──→ downloading ─↗   │
//!        │                          ↓
//!        └──────────→ conflict ←────┘
//!
//!   any ──→ paused / error (and back to a re-sync entry state)
//! ```
//!
//! Transitions are validated by [`SyncState::can_transition_to`]; the
//! orchestrator and the conflict engine are the only writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    conflict::ConflictInfo,
    errors::DomainError,
    newtypes::{ContentHash, ItemId, LocalPath, RemotePath},
};

// ============================================================================
// ItemKind
// ============================================================================

/// Whether an item is a regular file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    /// Stable lowercase name, used in logs and the database
    pub fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// SyncState
// ============================================================================

/// Synchronization state of one item
///
/// Serialized with kebab-case names (`local-only`, `cloud-only`, ...) which
/// are also the database representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    /// Exists locally, not yet on the remote
    LocalOnly,
    /// Exists on the remote, not yet locally
    CloudOnly,
    /// Upload in flight
    Uploading,
    /// Download in flight
    Downloading,
    /// Both replicas agree
    Synced,
    /// Divergence detected; waiting for resolution
    Conflict,
    /// Last attempt failed after exhausting retries
    Error,
    /// Explicitly held; skipped by reconciliation
    Paused,
}

impl SyncState {
    /// Stable kebab-case name matching the serde representation
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalOnly => "local-only",
            Self::CloudOnly => "cloud-only",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Error => "error",
            Self::Paused => "paused",
        }
    }

    /// Parses the kebab-case name back into a state
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "local-only" => Ok(Self::LocalOnly),
            "cloud-only" => Ok(Self::CloudOnly),
            "uploading" => Ok(Self::Uploading),
            "downloading" => Ok(Self::Downloading),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            "paused" => Ok(Self::Paused),
            other => Err(DomainError::ValidationFailed {
                field: "sync_state".to_string(),
                message: format!("unknown state '{other}'"),
            }),
        }
    }

    /// All states, for iteration in queries and tests
    pub fn all() -> [SyncState; 8] {
        [
            Self::LocalOnly,
            Self::CloudOnly,
            Self::Uploading,
            Self::Downloading,
            Self::Synced,
            Self::Conflict,
            Self::Error,
            Self::Paused,
        ]
    }

    /// True while a transfer is in flight
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading)
    }

    /// True if reconciliation should skip this item
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading | Self::Paused)
    }

    /// True if the item needs user or retry attention
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::Conflict | Self::Error)
    }

    /// Whether `self → to` is a legal transition
    ///
    /// Self-transitions are allowed as no-ops (idempotent updates from
    /// racing reconciliation passes).
    pub fn can_transition_to(&self, to: SyncState) -> bool {
        if *self == to {
            return true;
        }
        use SyncState::*;
        match self {
            LocalOnly => matches!(to, Uploading | Conflict | Paused | Error),
            CloudOnly => matches!(to, Downloading | Conflict | Paused | Error),
            Uploading => matches!(to, Synced | Error | Paused | Conflict),
            Downloading => matches!(to, Synced | Error | Paused | Conflict),
            Synced => matches!(to, LocalOnly | CloudOnly | Conflict | Paused | Error),
            Conflict => matches!(to, Synced | LocalOnly | CloudOnly | Uploading | Downloading | Paused),
            Error => matches!(to, LocalOnly | CloudOnly | Paused),
            Paused => matches!(to, LocalOnly | CloudOnly | Synced | Conflict | Error),
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// ErrorInfo
// ============================================================================

/// Failure bookkeeping recorded against an item in `Error` state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable description of the last failure
    pub message: String,
    /// When the failure occurred
    pub occurred_at: DateTime<Utc>,
    /// How many reconciliation passes have retried this item since
    pub retry_count: u32,
}

impl ErrorInfo {
    /// Records a fresh failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            occurred_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Bumps the retry counter for the next pass
    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }
}

// ============================================================================
// SyncItem
// ============================================================================

/// One tracked filesystem entry and everything the engine knows about it
///
/// Fields are private; mutation goes through methods that preserve the
/// invariants (validated state transitions, hash only on files, conflict
/// descriptor only in `Conflict` state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    id: ItemId,
    local_path: LocalPath,
    remote_path: RemotePath,
    name: String,
    kind: ItemKind,
    size_bytes: u64,
    modified_at: DateTime<Utc>,
    hash: Option<ContentHash>,
    state: SyncState,
    conflict: Option<ConflictInfo>,
    selected: bool,
    offline_available: bool,
    last_synced_at: Option<DateTime<Utc>>,
    parent_id: Option<ItemId>,
    error_info: Option<ErrorInfo>,
}

impl SyncItem {
    /// Creates an item first discovered locally (state `LocalOnly`)
    pub fn new_local(
        local_path: LocalPath,
        remote_path: RemotePath,
        kind: ItemKind,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hash: Option<ContentHash>,
    ) -> Self {
        let name = local_path
            .file_name()
            .unwrap_or_default()
            .to_string();
        Self {
            id: ItemId::new(),
            local_path,
            remote_path,
            name,
            kind,
            size_bytes,
            modified_at,
            hash: if kind == ItemKind::File { hash } else { None },
            state: SyncState::LocalOnly,
            conflict: None,
            selected: true,
            offline_available: false,
            last_synced_at: None,
            parent_id: None,
            error_info: None,
        }
    }

    /// Creates an item first discovered on the remote (state `CloudOnly`)
    pub fn new_remote(
        local_path: LocalPath,
        remote_path: RemotePath,
        kind: ItemKind,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hash: Option<ContentHash>,
    ) -> Self {
        let mut item = Self::new_local(local_path, remote_path, kind, size_bytes, modified_at, hash);
        item.state = SyncState::CloudOnly;
        item
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn local_path(&self) -> &LocalPath {
        &self.local_path
    }

    pub fn remote_path(&self) -> &RemotePath {
        &self.remote_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Size in bytes; not authoritative for folders (derived on demand)
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        self.conflict.as_ref()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_offline_available(&self) -> bool {
        self.offline_available
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    pub fn parent_id(&self) -> Option<ItemId> {
        self.parent_id
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error_info.as_ref()
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Validated state transition
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidStateTransition`] for illegal moves.
    pub fn transition_to(&mut self, to: SyncState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.name().to_string(),
                to: to.name().to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Updates content metadata after a local change or completed download
    pub fn update_content(
        &mut self,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hash: Option<ContentHash>,
    ) {
        self.size_bytes = size_bytes;
        self.modified_at = modified_at;
        if self.kind == ItemKind::File {
            self.hash = hash;
        }
    }

    /// Records a rename/move: new paths and display name
    pub fn relocate(&mut self, local_path: LocalPath, remote_path: RemotePath) {
        self.name = local_path.file_name().unwrap_or_default().to_string();
        self.local_path = local_path;
        self.remote_path = remote_path;
    }

    /// Marks the item as agreeing on both sides
    ///
    /// Clears any conflict and error bookkeeping and stamps
    /// `last_synced_at`.
    pub fn mark_synced(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncState::Synced)?;
        self.conflict = None;
        self.error_info = None;
        self.last_synced_at = Some(Utc::now());
        Ok(())
    }

    /// Attaches a conflict descriptor and enters `Conflict` state
    pub fn mark_conflicted(&mut self, info: ConflictInfo) -> Result<(), DomainError> {
        self.transition_to(SyncState::Conflict)?;
        self.conflict = Some(info);
        Ok(())
    }

    /// Records a terminal failure and enters `Error` state
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), DomainError> {
        self.transition_to(SyncState::Error)?;
        match &mut self.error_info {
            Some(info) => {
                info.message = message.into();
                info.occurred_at = Utc::now();
            }
            None => self.error_info = Some(ErrorInfo::new(message)),
        }
        Ok(())
    }

    /// Resets an errored item so the next pass can retry it
    ///
    /// The retry counter survives so repeated failures stay visible.
    pub fn reset_for_retry(&mut self, entry_state: SyncState) -> Result<(), DomainError> {
        self.transition_to(entry_state)?;
        if let Some(info) = &mut self.error_info {
            info.increment_retry();
        }
        Ok(())
    }

    /// Rewrites the item's kind after a type-conflict resolution replaced
    /// one replica with the other side's kind
    pub fn change_kind(&mut self, kind: ItemKind) {
        self.kind = kind;
        if kind == ItemKind::Folder {
            self.hash = None;
        }
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub fn set_offline_available(&mut self, available: bool) {
        self.offline_available = available;
    }

    pub fn set_parent_id(&mut self, parent: Option<ItemId>) {
        self.parent_id = parent;
    }

    /// Reconstructs an item from persisted fields, bypassing the
    /// constructor defaults. Used only by the metadata store.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: ItemId,
        local_path: LocalPath,
        remote_path: RemotePath,
        name: String,
        kind: ItemKind,
        size_bytes: u64,
        modified_at: DateTime<Utc>,
        hash: Option<ContentHash>,
        state: SyncState,
        conflict: Option<ConflictInfo>,
        selected: bool,
        offline_available: bool,
        last_synced_at: Option<DateTime<Utc>>,
        parent_id: Option<ItemId>,
        error_info: Option<ErrorInfo>,
    ) -> Self {
        Self {
            id,
            local_path,
            remote_path,
            name,
            kind,
            size_bytes,
            modified_at,
            hash,
            state,
            conflict,
            selected,
            offline_available,
            last_synced_at,
            parent_id,
            error_info,
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(state: SyncState) -> SyncItem {
        let mut it = SyncItem::new_local(
            LocalPath::new("/sync/a.txt").unwrap(),
            RemotePath::new("/a.txt").unwrap(),
            ItemKind::File,
            42,
            Utc::now(),
            Some(ContentHash::new("abc123").unwrap()),
        );
        it.state = state;
        it
    }

    fn conflict_info() -> ConflictInfo {
        use crate::domain::conflict::{ConflictType, VersionInfo};
        let v = VersionInfo {
            name: "a.txt".into(),
            kind: ItemKind::File,
            size_bytes: 42,
            modified_at: Utc::now(),
            hash: None,
        };
        ConflictInfo::new(ConflictType::Content, v.clone(), v)
    }

    mod state_machine_tests {
        use super::*;

        #[test]
        fn test_new_local_starts_local_only() {
            assert_eq!(item(SyncState::LocalOnly).state(), SyncState::LocalOnly);
        }

        #[test]
        fn test_upload_lifecycle() {
            let mut it = item(SyncState::LocalOnly);
            it.transition_to(SyncState::Uploading).unwrap();
            it.mark_synced().unwrap();
            assert_eq!(it.state(), SyncState::Synced);
            assert!(it.last_synced_at().is_some());
        }

        #[test]
        fn test_download_lifecycle() {
            let mut it = item(SyncState::CloudOnly);
            it.transition_to(SyncState::Downloading).unwrap();
            it.mark_synced().unwrap();
            assert_eq!(it.state(), SyncState::Synced);
        }

        #[test]
        fn test_local_only_cannot_jump_to_synced() {
            let mut it = item(SyncState::LocalOnly);
            assert!(it.transition_to(SyncState::Synced).is_err());
        }

        #[test]
        fn test_synced_can_reenter_transfer_states_via_entry() {
            // Re-upload path: synced -> local-only -> uploading
            let mut it = item(SyncState::Synced);
            it.transition_to(SyncState::LocalOnly).unwrap();
            it.transition_to(SyncState::Uploading).unwrap();
        }

        #[test]
        fn test_error_resets_to_entry_states_only() {
            let mut it = item(SyncState::Error);
            assert!(it.state().can_transition_to(SyncState::LocalOnly));
            assert!(it.state().can_transition_to(SyncState::CloudOnly));
            assert!(it.transition_to(SyncState::Uploading).is_err());
        }

        #[test]
        fn test_self_transition_is_noop() {
            let mut it = item(SyncState::Synced);
            it.transition_to(SyncState::Synced).unwrap();
            assert_eq!(it.state(), SyncState::Synced);
        }

        #[test]
        fn test_state_name_roundtrip() {
            for state in SyncState::all() {
                assert_eq!(SyncState::parse(state.name()).unwrap(), state);
            }
        }

        #[test]
        fn test_serde_uses_kebab_case() {
            let json = serde_json::to_string(&SyncState::LocalOnly).unwrap();
            assert_eq!(json, "\"local-only\"");
            let json = serde_json::to_string(&SyncState::CloudOnly).unwrap();
            assert_eq!(json, "\"cloud-only\"");
        }

        #[test]
        fn test_held_and_attention_predicates() {
            assert!(SyncState::Uploading.is_held());
            assert!(SyncState::Paused.is_held());
            assert!(!SyncState::Synced.is_held());
            assert!(SyncState::Conflict.needs_attention());
            assert!(SyncState::Error.needs_attention());
        }
    }

    mod conflict_bookkeeping_tests {
        use super::*;

        #[test]
        fn test_mark_conflicted_attaches_descriptor() {
            let mut it = item(SyncState::Synced);
            it.mark_conflicted(conflict_info()).unwrap();
            assert_eq!(it.state(), SyncState::Conflict);
            assert!(it.conflict().is_some());
        }

        #[test]
        fn test_mark_synced_clears_conflict() {
            let mut it = item(SyncState::Synced);
            it.mark_conflicted(conflict_info()).unwrap();
            it.mark_synced().unwrap();
            assert!(it.conflict().is_none());
        }
    }

    mod error_bookkeeping_tests {
        use super::*;

        #[test]
        fn test_mark_failed_records_message() {
            let mut it = item(SyncState::Uploading);
            it.mark_failed("server error (status 503)").unwrap();
            assert_eq!(it.state(), SyncState::Error);
            assert_eq!(it.error_info().unwrap().message, "server error (status 503)");
        }

        #[test]
        fn test_retry_counter_survives_reset() {
            let mut it = item(SyncState::Uploading);
            it.mark_failed("boom").unwrap();
            it.reset_for_retry(SyncState::LocalOnly).unwrap();
            assert_eq!(it.error_info().unwrap().retry_count, 1);
            assert_eq!(it.state(), SyncState::LocalOnly);
        }

        #[test]
        fn test_mark_synced_clears_error() {
            let mut it = item(SyncState::Uploading);
            it.mark_failed("boom").unwrap();
            it.reset_for_retry(SyncState::LocalOnly).unwrap();
            it.transition_to(SyncState::Uploading).unwrap();
            it.mark_synced().unwrap();
            assert!(it.error_info().is_none());
        }
    }

    mod content_tests {
        use super::*;

        #[test]
        fn test_update_content_refreshes_metadata() {
            let mut it = item(SyncState::Synced);
            let now = Utc::now();
            it.update_content(100, now, Some(ContentHash::new("ff00").unwrap()));
            assert_eq!(it.size_bytes(), 100);
            assert_eq!(it.modified_at(), now);
            assert_eq!(it.hash().unwrap().as_str(), "ff00");
        }

        #[test]
        fn test_folders_never_carry_hash() {
            let it = SyncItem::new_local(
                LocalPath::new("/sync/dir").unwrap(),
                RemotePath::new("/dir").unwrap(),
                ItemKind::Folder,
                0,
                Utc::now(),
                Some(ContentHash::new("abc1").unwrap()),
            );
            assert!(it.hash().is_none());
        }

        #[test]
        fn test_relocate_updates_paths_and_name() {
            let mut it = item(SyncState::Synced);
            it.relocate(
                LocalPath::new("/sync/b.txt").unwrap(),
                RemotePath::new("/b.txt").unwrap(),
            );
            assert_eq!(it.name(), "b.txt");
            assert_eq!(it.remote_path().as_str(), "/b.txt");
        }
    }
}
