//! SQLite implementation of IMetadataStore
//!
//! Concrete SQLite-based implementation of the metadata store port defined
//! in nimbus-core. Handles all domain type serialization/deserialization
//! and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type      | SQL Type | Strategy                                  |
//! |------------------|----------|-------------------------------------------|
//! | ItemId           | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | LocalPath        | TEXT     | Path string via `.to_string()` / `LocalPath::new()` |
//! | RemotePath       | TEXT     | String via `.as_str()` / `RemotePath::new()` |
//! | ContentHash      | TEXT     | String via `.as_str()` / `ContentHash::new()` |
//! | DateTime<Utc>    | TEXT     | ISO 8601 via `to_rfc3339()`               |
//! | SyncState        | TEXT     | Kebab-case name via `.name()` / `parse()` |
//! | ItemKind         | TEXT     | Lowercase name via `.name()`              |
//! | ConflictInfo     | TEXT     | serde_json serialization                  |
//! | ErrorInfo        | TEXT     | serde_json serialization                  |
//!
//! Per-item writes are single statements, so SQLite's statement atomicity
//! gives the port's no-partial-update guarantee for free.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use nimbus_core::domain::{ItemId, LocalPath, RemotePath, SyncItem, SyncState};
use nimbus_core::ports::IMetadataStore;

use crate::StoreError;

/// Key of the global configuration record in `engine_state`
const KEY_CONFIG: &str = "config";
/// Key of the previous selective-sync selection set in `engine_state`
const KEY_PREVIOUS_SELECTION: &str = "previous_selection";
/// Key of the persisted remote change cursor in `engine_state`
const KEY_CHANGE_CURSOR: &str = "change_cursor";

/// Ordered schema migrations
///
/// `PRAGMA user_version` records how many of these a database has already
/// applied, so opening an existing store only runs the new tail. Append
/// new steps; never edit an applied one.
const MIGRATIONS: &[&str] = &[include_str!("migrations/0001_sync_items.sql")];

/// SQLite-based implementation of the metadata store port
///
/// All operations go through a connection pool; per-item reads and writes
/// of the same row are serialized by SQLite itself. The last configuration
/// record successfully written or read is also kept in memory, so a
/// corrupted stored record degrades to the last good copy instead of
/// losing the configuration outright.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
    last_good_config: Mutex<Option<String>>,
}

impl SqliteMetadataStore {
    /// Wraps an externally managed connection pool without migrating
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            last_good_config: Mutex::new(None),
        }
    }

    /// Opens (or creates) the store at the given path
    ///
    /// Creates parent directories, connects with WAL journaling and
    /// NORMAL synchronous (the WAL pairing), and applies any pending
    /// schema migrations.
    ///
    /// # Errors
    ///
    /// `StoreError::Unavailable` if the file cannot be opened,
    /// `StoreError::MigrationFailed` if the schema cannot be brought up
    /// to date or is newer than this build understands.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "create store directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // The engine serializes writes per item; one writer plus a few
        // concurrent readers is all this schema ever sees
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("connect to {}: {e}", db_path.display()))
            })?;

        let store = Self {
            pool,
            last_good_config: Mutex::new(None),
        };
        store.migrate().await?;
        info!(path = %db_path.display(), "Metadata store opened");
        Ok(store)
    }

    /// Opens an in-memory store for tests
    ///
    /// In-memory SQLite databases are per-connection, so the pool is
    /// pinned to a single connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("create in-memory store: {e}"))
            })?;

        let store = Self {
            pool,
            last_good_config: Mutex::new(None),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the migration tail past the recorded schema version
    ///
    /// Each step runs in its own transaction together with the
    /// `user_version` bump, so a failed step leaves the version untouched.
    async fn migrate(&self) -> Result<(), StoreError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        let applied = usize::try_from(version).unwrap_or(0);

        if applied > MIGRATIONS.len() {
            return Err(StoreError::MigrationFailed(format!(
                "database schema version {applied} is newer than this build knows ({})",
                MIGRATIONS.len()
            )));
        }

        for (step, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
                StoreError::MigrationFailed(format!("migration {}: {e}", step + 1))
            })?;
            sqlx::raw_sql(&format!("PRAGMA user_version = {}", step + 1))
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
            tx.commit().await?;
            debug!(version = step + 1, "Schema migration applied");
        }
        Ok(())
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO engine_state (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM engine_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}

// ============================================================================
// Row mapping
// ============================================================================

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Serialization(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Reconstruct a SyncItem from a database row
///
/// Uses serde JSON deserialization to reconstruct the SyncItem since the
/// struct has private fields that can only be set through constructors or
/// deserialization.
fn sync_item_from_row(row: &SqliteRow) -> Result<SyncItem, StoreError> {
    let id: String = row.get("id");
    let local_path: String = row.get("local_path");
    let remote_path: String = row.get("remote_path");
    let name: String = row.get("name");
    let kind: String = row.get("kind");
    let size_bytes: i64 = row.get("size_bytes");
    let modified_at: String = row.get("modified_at");
    let hash: Option<String> = row.get("hash");
    let state: String = row.get("state");
    let conflict: Option<String> = row.get("conflict");
    let selected: i64 = row.get("selected");
    let offline_available: i64 = row.get("offline_available");
    let last_synced_at: Option<String> = row.get("last_synced_at");
    let parent_id: Option<String> = row.get("parent_id");
    let error_info: Option<String> = row.get("error_info");

    let conflict_val: serde_json::Value = match conflict {
        Some(ref s) if !s.is_empty() => serde_json::from_str(s)
            .map_err(|e| StoreError::Serialization(format!("Invalid conflict JSON: {}", e)))?,
        _ => serde_json::Value::Null,
    };

    let error_info_val: serde_json::Value = match error_info {
        Some(ref s) if !s.is_empty() => serde_json::from_str(s)
            .map_err(|e| StoreError::Serialization(format!("Invalid error_info JSON: {}", e)))?,
        _ => serde_json::Value::Null,
    };

    let last_synced_val = match last_synced_at {
        Some(ref s) if !s.is_empty() => {
            serde_json::Value::String(parse_datetime(s)?.to_rfc3339())
        }
        _ => serde_json::Value::Null,
    };

    // Reconstruct via JSON deserialization for correct field mapping
    let item_json = serde_json::json!({
        "id": id,
        "local_path": local_path,
        "remote_path": remote_path,
        "name": name,
        "kind": kind,
        "size_bytes": size_bytes as u64,
        "modified_at": parse_datetime(&modified_at)?.to_rfc3339(),
        "hash": hash,
        "state": state,
        "conflict": conflict_val,
        "selected": selected != 0,
        "offline_available": offline_available != 0,
        "last_synced_at": last_synced_val,
        "parent_id": parent_id,
        "error_info": error_info_val,
    });

    serde_json::from_value(item_json).map_err(|e| {
        StoreError::Serialization(format!("Failed to reconstruct SyncItem from row: {}", e))
    })
}

/// Column values for one item, in write order
struct ItemBinds {
    id: String,
    local_path: String,
    remote_path: String,
    name: String,
    kind: String,
    size_bytes: i64,
    modified_at: String,
    hash: Option<String>,
    state: String,
    conflict: Option<String>,
    selected: i64,
    offline_available: i64,
    last_synced_at: Option<String>,
    parent_id: Option<String>,
    error_info: Option<String>,
}

fn item_binds(item: &SyncItem) -> Result<ItemBinds, StoreError> {
    let conflict = item
        .conflict()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let error_info = item
        .error_info()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    Ok(ItemBinds {
        id: item.id().to_string(),
        local_path: item.local_path().to_string(),
        remote_path: item.remote_path().as_str().to_string(),
        name: item.name().to_string(),
        kind: item.kind().name().to_string(),
        size_bytes: item.size_bytes() as i64,
        modified_at: item.modified_at().to_rfc3339(),
        hash: item.hash().map(|h| h.as_str().to_string()),
        state: item.state().name().to_string(),
        conflict,
        selected: i64::from(item.is_selected()),
        offline_available: i64::from(item.is_offline_available()),
        last_synced_at: item.last_synced_at().map(|dt| dt.to_rfc3339()),
        parent_id: item.parent_id().map(|id| id.to_string()),
        error_info,
    })
}

// ============================================================================
// IMetadataStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IMetadataStore for SqliteMetadataStore {
    async fn insert(&self, item: &SyncItem) -> anyhow::Result<()> {
        let b = item_binds(item)?;
        sqlx::query(
            "INSERT INTO sync_items \
             (id, local_path, remote_path, name, kind, size_bytes, modified_at, hash, \
              state, conflict, selected, offline_available, last_synced_at, parent_id, error_info) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&b.id)
        .bind(&b.local_path)
        .bind(&b.remote_path)
        .bind(&b.name)
        .bind(&b.kind)
        .bind(b.size_bytes)
        .bind(&b.modified_at)
        .bind(&b.hash)
        .bind(&b.state)
        .bind(&b.conflict)
        .bind(b.selected)
        .bind(b.offline_available)
        .bind(&b.last_synced_at)
        .bind(&b.parent_id)
        .bind(&b.error_info)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update(&self, item: &SyncItem) -> anyhow::Result<()> {
        let b = item_binds(item)?;
        let result = sqlx::query(
            "UPDATE sync_items SET \
             local_path = ?, remote_path = ?, name = ?, kind = ?, size_bytes = ?, \
             modified_at = ?, hash = ?, state = ?, conflict = ?, selected = ?, \
             offline_available = ?, last_synced_at = ?, parent_id = ?, error_info = ? \
             WHERE id = ?",
        )
        .bind(&b.local_path)
        .bind(&b.remote_path)
        .bind(&b.name)
        .bind(&b.kind)
        .bind(b.size_bytes)
        .bind(&b.modified_at)
        .bind(&b.hash)
        .bind(&b.state)
        .bind(&b.conflict)
        .bind(b.selected)
        .bind(b.offline_available)
        .bind(&b.last_synced_at)
        .bind(&b.parent_id)
        .bind(&b.error_info)
        .bind(&b.id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            anyhow::bail!(StoreError::Constraint(format!(
                "update of unknown item {}",
                b.id
            )));
        }
        Ok(())
    }

    async fn upsert(&self, item: &SyncItem) -> anyhow::Result<()> {
        let b = item_binds(item)?;
        sqlx::query(
            "INSERT OR REPLACE INTO sync_items \
             (id, local_path, remote_path, name, kind, size_bytes, modified_at, hash, \
              state, conflict, selected, offline_available, last_synced_at, parent_id, error_info) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&b.id)
        .bind(&b.local_path)
        .bind(&b.remote_path)
        .bind(&b.name)
        .bind(&b.kind)
        .bind(b.size_bytes)
        .bind(&b.modified_at)
        .bind(&b.hash)
        .bind(&b.state)
        .bind(&b.conflict)
        .bind(b.selected)
        .bind(b.offline_available)
        .bind(&b.last_synced_at)
        .bind(&b.parent_id)
        .bind(&b.error_info)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete(&self, id: ItemId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get(&self, id: ItemId) -> anyhow::Result<Option<SyncItem>> {
        let row = sqlx::query("SELECT * FROM sync_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.map(|r| sync_item_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn get_by_local_path(&self, path: &LocalPath) -> anyhow::Result<Option<SyncItem>> {
        let row = sqlx::query("SELECT * FROM sync_items WHERE local_path = ?")
            .bind(path.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.map(|r| sync_item_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn get_by_remote_path(&self, path: &RemotePath) -> anyhow::Result<Option<SyncItem>> {
        let row = sqlx::query("SELECT * FROM sync_items WHERE remote_path = ?")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.map(|r| sync_item_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<SyncItem>> {
        let rows = sqlx::query("SELECT * FROM sync_items ORDER BY local_path")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter()
            .map(sync_item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn list_by_state(&self, state: SyncState) -> anyhow::Result<Vec<SyncItem>> {
        let rows = sqlx::query("SELECT * FROM sync_items WHERE state = ? ORDER BY local_path")
            .bind(state.name())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter()
            .map(sync_item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn list_children(&self, parent: ItemId) -> anyhow::Result<Vec<SyncItem>> {
        let rows = sqlx::query("SELECT * FROM sync_items WHERE parent_id = ? ORDER BY name")
            .bind(parent.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter()
            .map(sync_item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn set_state(&self, id: ItemId, state: SyncState) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE sync_items SET state = ? WHERE id = ?")
            .bind(state.name())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            anyhow::bail!(StoreError::Constraint(format!(
                "set_state of unknown item {id}"
            )));
        }
        Ok(())
    }

    async fn save_config(&self, config_json: &str) -> anyhow::Result<()> {
        // Reject unparseable blobs up front so a bad write can never
        // poison the stored record.
        serde_json::from_str::<serde_json::Value>(config_json)
            .map_err(|e| StoreError::Serialization(format!("config is not valid JSON: {e}")))?;
        self.kv_set(KEY_CONFIG, config_json).await?;
        *self.last_good_config.lock().expect("config lock poisoned") =
            Some(config_json.to_string());
        Ok(())
    }

    async fn load_config(&self) -> anyhow::Result<Option<String>> {
        let Some(raw) = self.kv_get(KEY_CONFIG).await? else {
            return Ok(None);
        };
        if serde_json::from_str::<serde_json::Value>(&raw).is_ok() {
            *self.last_good_config.lock().expect("config lock poisoned") = Some(raw.clone());
            return Ok(Some(raw));
        }
        // A corrupted stored record degrades to the last good copy; with
        // none to fall back to, the corruption has to surface.
        match self
            .last_good_config
            .lock()
            .expect("config lock poisoned")
            .clone()
        {
            Some(last_good) => {
                warn!("Stored configuration record is malformed, using last good copy");
                Ok(Some(last_good))
            }
            None => Err(StoreError::Serialization(
                "stored configuration record is malformed and no prior copy exists".to_string(),
            )
            .into()),
        }
    }

    async fn save_previous_selection(&self, remote_paths: &[RemotePath]) -> anyhow::Result<()> {
        let paths: Vec<&str> = remote_paths.iter().map(|p| p.as_str()).collect();
        let json = serde_json::to_string(&paths)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv_set(KEY_PREVIOUS_SELECTION, &json).await?;
        Ok(())
    }

    async fn load_previous_selection(&self) -> anyhow::Result<Vec<RemotePath>> {
        let Some(raw) = self.kv_get(KEY_PREVIOUS_SELECTION).await? else {
            return Ok(Vec::new());
        };
        let paths: Vec<String> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Serialization(format!("Invalid selection JSON: {e}")))?;
        paths
            .into_iter()
            .map(|p| RemotePath::new(p).map_err(Into::into))
            .collect()
    }

    async fn save_change_cursor(&self, cursor: &str) -> anyhow::Result<()> {
        self.kv_set(KEY_CHANGE_CURSOR, cursor).await?;
        Ok(())
    }

    async fn load_change_cursor(&self) -> anyhow::Result<Option<String>> {
        Ok(self.kv_get(KEY_CHANGE_CURSOR).await?)
    }
}
