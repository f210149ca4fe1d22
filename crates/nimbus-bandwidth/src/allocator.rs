//! Bandwidth allocator
//!
//! Splits the effective limit of each direction across the active transfers
//! in proportion to their priority weights. The effective limit is derived
//! from the configured ceiling through a fixed pipeline:
//!
//! ```text
//! configured -> halved if power-saving -> x quality factor if auto-throttle
//! ```
//!
//! Transfers are refused outright (budget 0) while the allocator is paused,
//! the link is down, the connection is metered with metered sync disabled,
//! or the wall clock is outside every configured sync window. Every granted
//! share is floored at 1 KiB/s so a low-priority transfer can always
//! finish eventually.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Timelike;
use dashmap::DashMap;
use tracing::{debug, info};

use nimbus_core::config::BandwidthConfig;
use nimbus_core::domain::{
    BandwidthAllocation, TransferDirection, TransferId, TransferPriority,
};
use nimbus_core::ports::{NetworkStatus, NetworkType};

use crate::network::NetworkQuality;
use crate::usage::UsageHistory;

/// Minimum granted share, bytes per second
pub const MIN_ALLOCATION_BPS: u64 = 1024;

/// Unlimited budget sentinel, returned when no ceiling is configured
pub const UNLIMITED_BPS: u64 = u64::MAX;

/// Samples retained in the usage ring buffer
const USAGE_HISTORY_CAPACITY: usize = 256;

/// Priority-weighted bandwidth budgeting across active transfers
pub struct BandwidthAllocator {
    config: Mutex<BandwidthConfig>,
    allocations: DashMap<TransferId, BandwidthAllocation>,
    // Optimistic until the monitor reports a real condition
    status: Mutex<NetworkStatus>,
    paused: AtomicBool,
    usage: Mutex<UsageHistory>,
}

impl BandwidthAllocator {
    pub fn new(config: BandwidthConfig) -> Self {
        Self {
            config: Mutex::new(config),
            allocations: DashMap::new(),
            status: Mutex::new(NetworkStatus::reachable(NetworkType::Ethernet)),
            paused: AtomicBool::new(false),
            usage: Mutex::new(UsageHistory::new(USAGE_HISTORY_CAPACITY)),
        }
    }

    /// Registers a transfer and returns its granted budget in bytes/sec
    ///
    /// 0 means refused; the allocation is kept so a later condition change
    /// can grant it without re-registering.
    pub fn allocate(
        &self,
        id: TransferId,
        direction: TransferDirection,
        priority: TransferPriority,
    ) -> u64 {
        self.allocations
            .insert(id, BandwidthAllocation::new(id, direction, priority));
        self.rebalance_direction(direction);
        let granted = self
            .allocations
            .get(&id)
            .map(|a| a.bytes_per_second)
            .unwrap_or(0);
        debug!(
            transfer_id = %id,
            direction = %direction,
            granted_bps = granted,
            "Bandwidth allocated"
        );
        granted
    }

    /// Registers a transfer and hands back an RAII lease for it
    ///
    /// The lease releases the budget when dropped, so an early return
    /// from a transfer path can never strand an allocation.
    pub fn lease(
        self: &Arc<Self>,
        direction: TransferDirection,
        priority: TransferPriority,
    ) -> BandwidthLease {
        let id = TransferId::new();
        self.allocate(id, direction, priority);
        BandwidthLease {
            allocator: Arc::clone(self),
            id,
            direction,
        }
    }

    /// Releases a transfer's budget and redistributes it
    pub fn release(&self, id: TransferId) {
        if let Some((_, allocation)) = self.allocations.remove(&id) {
            self.rebalance_direction(allocation.direction);
            debug!(transfer_id = %id, "Bandwidth released");
        }
    }

    /// Recomputes every active allocation in both directions
    pub fn rebalance(&self) {
        self.rebalance_direction(TransferDirection::Upload);
        self.rebalance_direction(TransferDirection::Download);
    }

    /// Current budget of one transfer, if registered
    pub fn allocation(&self, id: TransferId) -> Option<BandwidthAllocation> {
        self.allocations.get(&id).map(|a| a.clone())
    }

    /// Number of registered transfers
    pub fn active_transfers(&self) -> usize {
        self.allocations.len()
    }

    /// Swaps in a new configuration and rebalances
    pub fn update_config(&self, config: BandwidthConfig) {
        *self.config.lock().unwrap() = config;
        self.rebalance();
    }

    /// Applies a network condition change and rebalances
    pub fn handle_network_change(&self, status: NetworkStatus) {
        let quality = NetworkQuality::from_status(&status);
        info!(
            reachable = status.reachable,
            metered = status.metered,
            quality = %quality,
            "Network condition changed"
        );
        *self.status.lock().unwrap() = status;
        self.rebalance();
    }

    /// Suspends all budgets without dropping the registrations
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.rebalance();
    }

    /// Restores budgets after a pause
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.rebalance();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Quality derived from the last observed network condition
    pub fn current_quality(&self) -> NetworkQuality {
        NetworkQuality::from_status(&self.status.lock().unwrap())
    }

    /// Records completed traffic into the usage history
    pub fn record_usage(&self, direction: TransferDirection, bytes: u64) {
        self.usage.lock().unwrap().record(direction, bytes);
    }

    /// Total recorded bytes for one direction
    pub fn usage_total(&self, direction: TransferDirection) -> u64 {
        self.usage.lock().unwrap().total_bytes(direction)
    }

    /// Effective ceiling for one direction (None = unlimited)
    pub fn effective_limit(&self, direction: TransferDirection) -> Option<u64> {
        let config = self.config.lock().unwrap();
        let mut limit = match direction {
            TransferDirection::Upload => config.upload_limit_bps,
            TransferDirection::Download => config.download_limit_bps,
        };
        if config.power_saving {
            limit = limit.map(|l| l / 2);
        }
        if config.auto_throttle {
            let factor = self.current_quality().factor();
            limit = limit.map(|l| (l as f64 * factor) as u64);
        }
        limit
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Whether all transfers are currently refused
    fn transfers_refused(&self) -> bool {
        if self.is_paused() {
            return true;
        }
        let status = *self.status.lock().unwrap();
        if !status.reachable {
            return true;
        }
        let config = self.config.lock().unwrap();
        if status.metered && !config.allow_metered {
            return true;
        }
        if !config.sync_windows.is_empty() {
            let now = chrono::Local::now();
            let minutes = now.hour() * 60 + now.minute();
            if !config.sync_windows.iter().any(|w| w.contains(minutes)) {
                return true;
            }
        }
        false
    }

    fn rebalance_direction(&self, direction: TransferDirection) {
        let refused = self.transfers_refused();
        let limit = self.effective_limit(direction);

        let sum_weights: u64 = self
            .allocations
            .iter()
            .filter(|a| a.direction == direction)
            .map(|a| a.priority.weight())
            .sum();

        for mut entry in self.allocations.iter_mut() {
            if entry.direction != direction {
                continue;
            }
            entry.bytes_per_second = if refused || sum_weights == 0 {
                0
            } else {
                match limit {
                    None => UNLIMITED_BPS,
                    Some(total) => {
                        let share = total * entry.priority.weight() / sum_weights;
                        share.max(MIN_ALLOCATION_BPS)
                    }
                }
            };
        }
    }
}

// ============================================================================
// BandwidthLease
// ============================================================================

/// One transfer's registration with the allocator
///
/// A condition change can grant or refuse the lease after creation, so
/// callers re-read [`granted_bps`](Self::granted_bps) rather than caching
/// the number.
pub struct BandwidthLease {
    allocator: Arc<BandwidthAllocator>,
    id: TransferId,
    direction: TransferDirection,
}

impl BandwidthLease {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Budget currently granted to this transfer in bytes/sec; 0 = refused
    pub fn granted_bps(&self) -> u64 {
        self.allocator
            .allocation(self.id)
            .map(|a| a.bytes_per_second)
            .unwrap_or(0)
    }

    /// Records completed traffic against this lease's direction
    pub fn record_usage(&self, bytes: u64) {
        self.allocator.record_usage(self.direction, bytes);
    }
}

impl Drop for BandwidthLease {
    fn drop(&mut self) {
        self.allocator.release(self.id);
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use nimbus_core::config::SyncWindow;

    use super::*;

    fn config(upload: Option<u64>) -> BandwidthConfig {
        BandwidthConfig {
            upload_limit_bps: upload,
            download_limit_bps: upload,
            auto_throttle: false,
            power_saving: false,
            allow_metered: false,
            sync_windows: Vec::new(),
        }
    }

    fn allocate_n(
        allocator: &BandwidthAllocator,
        n: usize,
        priority: TransferPriority,
    ) -> Vec<(TransferId, u64)> {
        (0..n)
            .map(|_| {
                let id = TransferId::new();
                let granted = allocator.allocate(id, TransferDirection::Upload, priority);
                (id, granted)
            })
            .collect()
    }

    #[test]
    fn test_equal_priority_shares_are_equal_and_sum_to_limit() {
        let allocator = BandwidthAllocator::new(config(Some(4096)));
        let ids = allocate_n(&allocator, 4, TransferPriority::Normal);

        let shares: Vec<u64> = ids
            .iter()
            .map(|(id, _)| allocator.allocation(*id).unwrap().bytes_per_second)
            .collect();
        assert!(shares.iter().all(|s| *s == 1024));
        assert_eq!(shares.iter().sum::<u64>(), 4096);
    }

    #[test]
    fn test_double_weight_gets_double_share() {
        let allocator = BandwidthAllocator::new(config(Some(6144)));
        let high = TransferId::new();
        let normal = TransferId::new();
        allocator.allocate(high, TransferDirection::Upload, TransferPriority::High);
        allocator.allocate(normal, TransferDirection::Upload, TransferPriority::Normal);

        // weights 4 and 2 over a 6144 budget
        assert_eq!(allocator.allocation(high).unwrap().bytes_per_second, 4096);
        assert_eq!(allocator.allocation(normal).unwrap().bytes_per_second, 2048);
    }

    #[test]
    fn test_shares_are_floored_at_one_kibibyte() {
        let allocator = BandwidthAllocator::new(config(Some(2048)));
        let ids = allocate_n(&allocator, 4, TransferPriority::Normal);
        for (id, _) in ids {
            assert_eq!(
                allocator.allocation(id).unwrap().bytes_per_second,
                MIN_ALLOCATION_BPS
            );
        }
    }

    #[test]
    fn test_release_redistributes() {
        let allocator = BandwidthAllocator::new(config(Some(4096)));
        let ids = allocate_n(&allocator, 2, TransferPriority::Normal);
        assert_eq!(allocator.allocation(ids[0].0).unwrap().bytes_per_second, 2048);

        allocator.release(ids[1].0);
        assert_eq!(allocator.allocation(ids[0].0).unwrap().bytes_per_second, 4096);
        assert_eq!(allocator.active_transfers(), 1);
    }

    #[test]
    fn test_no_limit_means_unlimited() {
        let allocator = BandwidthAllocator::new(config(None));
        let granted = allocator.allocate(
            TransferId::new(),
            TransferDirection::Upload,
            TransferPriority::Low,
        );
        assert_eq!(granted, UNLIMITED_BPS);
    }

    #[test]
    fn test_power_saving_halves_the_limit() {
        let mut cfg = config(Some(8192));
        cfg.power_saving = true;
        let allocator = BandwidthAllocator::new(cfg);
        let granted = allocator.allocate(
            TransferId::new(),
            TransferDirection::Upload,
            TransferPriority::Normal,
        );
        assert_eq!(granted, 4096);
    }

    #[test]
    fn test_auto_throttle_scales_by_quality() {
        let mut cfg = config(Some(8192));
        cfg.auto_throttle = true;
        let allocator = BandwidthAllocator::new(cfg);

        // Fair (cellular, unmetered) halves the budget
        allocator.handle_network_change(NetworkStatus::reachable(NetworkType::Cellular));
        let granted = allocator.allocate(
            TransferId::new(),
            TransferDirection::Download,
            TransferPriority::Normal,
        );
        assert_eq!(granted, 4096);
    }

    #[test]
    fn test_pause_refuses_and_resume_restores() {
        let allocator = BandwidthAllocator::new(config(Some(4096)));
        let id = TransferId::new();
        allocator.allocate(id, TransferDirection::Upload, TransferPriority::Normal);

        allocator.pause();
        assert_eq!(allocator.allocation(id).unwrap().bytes_per_second, 0);

        allocator.resume();
        assert_eq!(allocator.allocation(id).unwrap().bytes_per_second, 4096);
    }

    #[test]
    fn test_metered_refuses_unless_allowed() {
        let allocator = BandwidthAllocator::new(config(Some(4096)));
        let id = TransferId::new();
        allocator.allocate(id, TransferDirection::Upload, TransferPriority::Normal);

        let mut status = NetworkStatus::reachable(NetworkType::Cellular);
        status.metered = true;
        allocator.handle_network_change(status);
        assert_eq!(allocator.allocation(id).unwrap().bytes_per_second, 0);

        let mut cfg = config(Some(4096));
        cfg.allow_metered = true;
        allocator.update_config(cfg);
        assert_eq!(allocator.allocation(id).unwrap().bytes_per_second, 4096);
    }

    #[test]
    fn test_offline_refuses_everything() {
        let allocator = BandwidthAllocator::new(config(Some(4096)));
        let id = TransferId::new();
        allocator.allocate(id, TransferDirection::Download, TransferPriority::Urgent);

        allocator.handle_network_change(NetworkStatus::offline());
        assert_eq!(allocator.allocation(id).unwrap().bytes_per_second, 0);
    }

    #[test]
    fn test_outside_all_windows_refuses() {
        let mut cfg = config(Some(4096));
        // Empty range (start == end, non-wrapping) matches no time of day
        cfg.sync_windows = vec![SyncWindow {
            start: "12:00".to_string(),
            end: "12:00".to_string(),
        }];
        let allocator = BandwidthAllocator::new(cfg);
        let granted = allocator.allocate(
            TransferId::new(),
            TransferDirection::Upload,
            TransferPriority::Normal,
        );
        assert_eq!(granted, 0);
    }

    #[test]
    fn test_full_day_window_pair_grants() {
        let mut cfg = config(Some(4096));
        // The two ranges cover the whole day between them
        cfg.sync_windows = vec![
            SyncWindow {
                start: "00:00".to_string(),
                end: "12:00".to_string(),
            },
            SyncWindow {
                start: "12:00".to_string(),
                end: "00:00".to_string(),
            },
        ];
        let allocator = BandwidthAllocator::new(cfg);
        let granted = allocator.allocate(
            TransferId::new(),
            TransferDirection::Upload,
            TransferPriority::Normal,
        );
        assert_eq!(granted, 4096);
    }

    #[test]
    fn test_directions_are_budgeted_independently() {
        let allocator = BandwidthAllocator::new(config(Some(4096)));
        let up = TransferId::new();
        let down = TransferId::new();
        allocator.allocate(up, TransferDirection::Upload, TransferPriority::Normal);
        allocator.allocate(down, TransferDirection::Download, TransferPriority::Normal);

        // Each is the sole transfer of its direction
        assert_eq!(allocator.allocation(up).unwrap().bytes_per_second, 4096);
        assert_eq!(allocator.allocation(down).unwrap().bytes_per_second, 4096);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let allocator = Arc::new(BandwidthAllocator::new(config(Some(4096))));
        let keeper = allocator.lease(TransferDirection::Upload, TransferPriority::Normal);
        {
            let second = allocator.lease(TransferDirection::Upload, TransferPriority::Normal);
            assert_eq!(second.granted_bps(), 2048);
            assert_eq!(keeper.granted_bps(), 2048);
        }
        // Dropping the second lease returned its share
        assert_eq!(keeper.granted_bps(), 4096);
        assert_eq!(allocator.active_transfers(), 1);
    }

    #[test]
    fn test_lease_tracks_condition_changes() {
        let allocator = Arc::new(BandwidthAllocator::new(config(Some(4096))));
        let lease = allocator.lease(TransferDirection::Download, TransferPriority::Normal);
        assert_eq!(lease.granted_bps(), 4096);

        allocator.handle_network_change(NetworkStatus::offline());
        assert_eq!(lease.granted_bps(), 0);

        allocator.handle_network_change(NetworkStatus::reachable(NetworkType::Ethernet));
        assert_eq!(lease.granted_bps(), 4096);
    }

    #[test]
    fn test_usage_recording() {
        let allocator = BandwidthAllocator::new(config(None));
        allocator.record_usage(TransferDirection::Upload, 500);
        allocator.record_usage(TransferDirection::Upload, 250);
        allocator.record_usage(TransferDirection::Download, 100);
        assert_eq!(allocator.usage_total(TransferDirection::Upload), 750);
        assert_eq!(allocator.usage_total(TransferDirection::Download), 100);
    }
}
