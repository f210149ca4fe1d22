//! nimbus-store - durable metadata persistence
//!
//! SQLite-backed implementation of the `IMetadataStore` port from
//! `nimbus-core`: the sync-item table, the global configuration record,
//! and the previous selective-sync selection set. A driven (secondary)
//! adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`SqliteMetadataStore`] - Full `IMetadataStore` implementation; owns
//!   its connection pool and versioned schema migrations
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use nimbus_store::SqliteMetadataStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store =
//!     SqliteMetadataStore::open(Path::new("/home/user/.local/share/nimbus/state.db")).await?;
//! // Use store as IMetadataStore...
//! # Ok(())
//! # }
//! ```

pub mod repository;

pub use repository::SqliteMetadataStore;

/// Errors that can occur during metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database cannot be reached at all
    ///
    /// Fatal to the orchestrator: it cannot safely proceed without ground
    /// truth.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A uniqueness or lookup precondition was violated
    #[error("Constraint violated: {0}")]
    Constraint(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Constraint(e.to_string())
            }
            _ => StoreError::QueryFailed(e.to_string()),
        }
    }
}
