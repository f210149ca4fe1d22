//! Transfer direction, priority, and per-transfer bandwidth allocations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::TransferId;

/// Which way the bytes flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Relative priority of a transfer
///
/// The numeric weight drives proportional bandwidth sharing: a transfer
/// receives `total × weight / sum_of_weights` of the effective limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPriority {
    /// Background housekeeping (cache prefetch)
    Low,
    /// Normal sync traffic
    Normal,
    /// User-visible operations (explicit download)
    High,
    /// Blocking the user right now (open-on-demand)
    Urgent,
}

impl TransferPriority {
    /// Weight used for proportional sharing
    pub fn weight(&self) -> u64 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 4,
            Self::Urgent => 8,
        }
    }
}

/// Ephemeral record of one active transfer's bandwidth budget
///
/// Exists only while the transfer is active; `bytes_per_second` is
/// recomputed on every rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthAllocation {
    /// Identifier of the transfer this budget belongs to
    pub transfer_id: TransferId,
    /// Upload or download; shares are computed per direction
    pub direction: TransferDirection,
    /// Priority weight class
    pub priority: TransferPriority,
    /// When the allocation was first requested
    pub requested_at: DateTime<Utc>,
    /// Current budget in bytes per second (0 = refused)
    pub bytes_per_second: u64,
}

impl BandwidthAllocation {
    /// Creates a new allocation with no budget assigned yet
    pub fn new(
        transfer_id: TransferId,
        direction: TransferDirection,
        priority: TransferPriority,
    ) -> Self {
        Self {
            transfer_id,
            direction,
            priority,
            requested_at: Utc::now(),
            bytes_per_second: 0,
        }
    }
}
