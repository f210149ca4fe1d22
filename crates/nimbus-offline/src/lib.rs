//! nimbus-offline - offline journaling and the bounded file cache
//!
//! Implements the offline layer of the Nimbus sync core:
//!
//! - [`OfflineQueue`] - timestamp-ordered journal of local changes made
//!   while disconnected, replayed against the transport on reconnect
//! - [`OfflineCache`] - bounded LRU cache of remote files pinned or
//!   opportunistically held for offline access
//!
//! The orchestrator sequences the two on reconnect: cache integrity is
//! validated first, then the journal replays.

pub mod cache;
pub mod queue;

pub use cache::OfflineCache;
pub use queue::{OfflineQueue, ReplayReport};
