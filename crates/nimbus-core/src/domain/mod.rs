//! Domain layer: entities, value objects, and domain errors
//!
//! Everything in this module is pure - no I/O, no async. The adapters and
//! the engine build on these types; invariants are enforced here so they
//! hold everywhere else.

pub mod conflict;
pub mod errors;
pub mod newtypes;
pub mod offline;
pub mod sync_item;
pub mod transfer;

pub use conflict::{ConflictInfo, ConflictStrategy, ConflictType, Resolution, VersionInfo};
pub use errors::{DomainError, SyncError};
pub use newtypes::{ChangeCursor, ContentHash, ItemId, LocalPath, RemotePath, TransferId};
pub use offline::{CachePriority, ModificationKind, OfflineCacheItem, OfflineModification};
pub use sync_item::{ErrorInfo, ItemKind, SyncItem, SyncState};
pub use transfer::{BandwidthAllocation, TransferDirection, TransferPriority};
