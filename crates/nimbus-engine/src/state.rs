//! Engine state, progress counters, and change notifications
//!
//! The orchestrator's externally visible state lives here: one
//! [`EngineState`] value behind an async `RwLock`, cumulative
//! [`SyncProgress`] counters, and a `broadcast` channel carrying
//! [`ItemNotification`]s for host UIs. The broadcast channel is bounded;
//! a consumer that stops reading lags and loses the oldest messages
//! instead of stalling the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use nimbus_core::domain::{ItemId, RemotePath, SyncState};

/// Broadcast channel depth before lagging consumers start losing messages
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// EngineState
// ============================================================================

/// Lifecycle state of the whole engine (distinct from per-item state)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Not running; no watcher attached
    Idle,
    /// Reconciliation loops active
    Syncing,
    /// Timer stopped, watcher still attached; events accumulate
    Paused,
    /// A fatal engine-level failure (store gone, root vanished)
    Error(String),
}

impl EngineState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Syncing)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Paused => write!(f, "paused"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

// ============================================================================
// SyncProgress
// ============================================================================

/// Cumulative counters since the engine started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub files_uploaded: u64,
    pub files_downloaded: u64,
    pub files_deleted: u64,
    pub conflicts_detected: u64,
    pub items_failed: u64,
}

// ============================================================================
// ItemNotification
// ============================================================================

/// One item-level change, published for host UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemNotification {
    pub item_id: ItemId,
    pub remote_path: RemotePath,
    pub state: SyncState,
    pub at: DateTime<Utc>,
}

// ============================================================================
// EngineStatus
// ============================================================================

/// Shared, concurrently readable view of the engine
///
/// The orchestrator holds this in an `Arc`; hosts clone the `Arc` to read
/// state and subscribe to notifications without touching the engine.
pub struct EngineStatus {
    state: RwLock<EngineState>,
    progress: RwLock<SyncProgress>,
    notifications: broadcast::Sender<ItemNotification>,
}

impl EngineStatus {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(EngineState::Idle),
            progress: RwLock::new(SyncProgress::default()),
            notifications,
        }
    }

    pub async fn state(&self) -> EngineState {
        self.state.read().await.clone()
    }

    pub async fn set_state(&self, state: EngineState) {
        let mut guard = self.state.write().await;
        if *guard != state {
            debug!(from = %*guard, to = %state, "Engine state changed");
            *guard = state;
        }
    }

    pub async fn progress(&self) -> SyncProgress {
        *self.progress.read().await
    }

    pub async fn update_progress(&self, apply: impl FnOnce(&mut SyncProgress)) {
        apply(&mut *self.progress.write().await);
    }

    /// Subscribes to item-change notifications
    ///
    /// Subscribers only see notifications published after they subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<ItemNotification> {
        self.notifications.subscribe()
    }

    /// Publishes an item change; silently dropped when nobody listens
    pub fn notify(&self, item_id: ItemId, remote_path: RemotePath, state: SyncState) {
        let _ = self.notifications.send(ItemNotification {
            item_id,
            remote_path,
            state,
            at: Utc::now(),
        });
    }
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit tests
// ============================================================================
