//! Error types for the synchronization domain
//!
//! Two layers of errors live here:
//!
//! - [`DomainError`] - violations of entity/value invariants (bad paths,
//!   illegal state transitions). These are programming or input errors and
//!   are never retried.
//! - [`SyncError`] - the operational taxonomy every sync operation maps its
//!   failures into. The retry policy dispatches on
//!   [`SyncError::is_retryable`]: transient network and server failures are
//!   retried with backoff, everything else is recorded against the item.
//!
//! Adapters returning `anyhow::Result` should attach a `SyncError` as the
//! root cause so the engine can classify failures by downcasting.

use thiserror::Error;

// ============================================================================
// DomainError
// ============================================================================

/// Invariant violations raised by domain constructors and entities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A path failed validation
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A local path resolved outside the configured sync root
    #[error("path '{path}' is outside the sync root '{root}'")]
    PathOutsideSyncRoot { path: String, root: String },

    /// An identifier failed validation
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    /// A content hash failed validation
    #[error("invalid content hash: {reason}")]
    InvalidHash { reason: String },

    /// An illegal sync-state transition was requested
    #[error("invalid state transition from '{from}' to '{to}'")]
    InvalidStateTransition { from: String, to: String },

    /// A field-level validation failure
    #[error("validation failed for '{field}': {message}")]
    ValidationFailed { field: String, message: String },
}

// ============================================================================
// SyncError
// ============================================================================

/// Operational error taxonomy for sync operations
///
/// Transport and filesystem adapters map their native failures into these
/// variants so the engine can apply a uniform retry policy. The taxonomy is
/// deliberately closed: adding a variant forces every `match` on retry
/// classification to be revisited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The item does not exist on the side that was asked
    #[error("not found: {0}")]
    NotFound(String),

    /// An item already exists where one was to be created
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The operating system denied access
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The local disk cannot hold the data
    #[error("insufficient space: {0}")]
    InsufficientSpace(String),

    /// No network route to the remote
    #[error("network unavailable")]
    NetworkUnavailable,

    /// The connection was established but timed out
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The remote returned a server-side failure
    #[error("server error (status {0})")]
    ServerError(u16),

    /// The remote is throttling this client
    #[error("rate limited by remote")]
    RateLimited,

    /// The engine configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Local and remote replicas diverged; resolution required
    #[error("conflict detected: {0}")]
    Conflict(String),

    /// Transferred content did not match its expected hash
    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    /// The metadata store cannot be reached
    #[error("metadata store unavailable: {0}")]
    DatabaseUnavailable(String),

    /// A conflict resolution is not legal for the conflict's type
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// A domain invariant was violated
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SyncError {
    /// Whether the retry wrapper should attempt this operation again
    ///
    /// Only transient transport conditions qualify: network loss, timeouts,
    /// 5xx server responses, and rate limiting. Conflicts are a state, not
    /// an error, and are excluded from the retry loop entirely.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkUnavailable | Self::ConnectionTimeout | Self::RateLimited => true,
            Self::ServerError(code) => *code >= 500,
            _ => false,
        }
    }

    /// Whether this failure is fatal to the engine as a whole
    ///
    /// Global failures move the orchestrator itself into its error state
    /// instead of being recorded against a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DatabaseUnavailable(_) | Self::InvalidConfiguration(_)
        )
    }
}

// ============================================================================
// Unit tests
// ============================================================================
