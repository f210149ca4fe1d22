//! nimbus-bandwidth - priority-weighted bandwidth budgeting
//!
//! Implements the bandwidth allocator of the Nimbus sync core:
//!
//! - [`BandwidthAllocator`] - splits each direction's effective limit
//!   across active transfers by priority weight, with a 1 KiB/s floor
//! - [`BandwidthLease`] - RAII registration a transfer task holds while
//!   moving bytes; dropping it returns the share
//! - [`NetworkQuality`] - quality ladder scaling limits under
//!   auto-throttle
//! - [`UsageHistory`] - fixed-capacity ring buffer of traffic samples
//!
//! The allocator is passive: transfer tasks take leases, and the
//! orchestrator feeds it configuration and network-condition changes.

pub mod allocator;
pub mod network;
pub mod usage;

pub use allocator::{BandwidthAllocator, BandwidthLease, MIN_ALLOCATION_BPS, UNLIMITED_BPS};
pub use network::NetworkQuality;
pub use usage::{UsageHistory, UsageSample};
