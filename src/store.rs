use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

use crate::model::UnixTimeMs;

pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";
const MAX_POOL_CONNECTIONS: u32 = 5;

/// Required collections, diffed against what exists at open time.
///
/// Migration is additive only: missing tables are created, existing tables
/// and their rows are never altered or dropped. Adding a collection in a
/// later release means appending here and bumping `SCHEMA_VERSION`.
const REQUIRED_COLLECTIONS: &[(&str, &str)] = &[
    (
        "routes",
        "CREATE TABLE routes (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            data BLOB NOT NULL
        )",
    ),
    (
        "tiles",
        "CREATE TABLE tiles (
            url TEXT PRIMARY KEY,
            image BLOB NOT NULL,
            fetched_at INTEGER NOT NULL
        )",
    ),
    (
        "contacts",
        "CREATE TABLE contacts (
            id TEXT PRIMARY KEY,
            saved_at INTEGER NOT NULL,
            data BLOB NOT NULL
        )",
    ),
    (
        "sos_logs",
        "CREATE TABLE sos_logs (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            data BLOB NOT NULL
        )",
    ),
    (
        "rescue_stations",
        "CREATE TABLE rescue_stations (
            id TEXT PRIMARY KEY,
            batch_at INTEGER NOT NULL,
            data BLOB NOT NULL
        )",
    ),
    (
        "kv",
        "CREATE TABLE kv (
            key TEXT PRIMARY KEY,
            updated_at INTEGER NOT NULL,
            data BLOB NOT NULL
        )",
    ),
];

#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying engine could not be opened or refuses writes. Callers
    /// treat this as "offline capability degraded", not a crash.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl StoreError {
    pub(crate) fn storage(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }

    pub(crate) fn serialization(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Handle to the local offline database. Cheap to clone; all clones share
/// one connection pool.
#[derive(Clone, Debug)]
pub struct OfflineDb {
    pool: SqlitePool,
}

static SHARED: OnceCell<OfflineDb> = OnceCell::const_new();

/// Process-wide shared handle.
///
/// Opening the engine is expensive, so the first successful open is memoized
/// for the life of the process; concurrent first callers share one in-flight
/// open and migration never runs twice. A failed open is not cached, so the
/// next call retries. The path of the first successful call wins.
pub async fn shared(path: impl AsRef<Path>) -> Result<&'static OfflineDb, StoreError> {
    SHARED
        .get_or_try_init(|| OfflineDb::open(path.as_ref()))
        .await
}

impl OfflineDb {
    /// Opens (creating if missing) the database file and ensures every
    /// required collection exists.
    #[instrument(skip(path))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Ephemeral database for tests and previews. A single connection:
    /// separate in-memory connections would each see their own database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::storage)?;

        for &(name, ddl) in REQUIRED_COLLECTIONS {
            if existing.iter().any(|t| t == name) {
                continue;
            }
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(StoreError::storage)?;
            info!(collection = name, "created missing collection");
        }

        let current: Option<u32> = self.get_value(SCHEMA_VERSION_KEY).await?;
        if current.map_or(true, |v| v < SCHEMA_VERSION) {
            self.put_value(SCHEMA_VERSION_KEY, &SCHEMA_VERSION, UnixTimeMs::now())
                .await?;
        }
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32, StoreError> {
        Ok(self.get_value(SCHEMA_VERSION_KEY).await?.unwrap_or(0))
    }

    /// Upsert into the generic key/value collection.
    pub async fn put_value<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        now: UnixTimeMs,
    ) -> Result<(), StoreError> {
        if key.trim().is_empty() {
            return Err(StoreError::Validation("kv key cannot be empty".into()));
        }
        let data = serde_json::to_vec(value).map_err(StoreError::serialization)?;
        sqlx::query(
            "INSERT INTO kv (key, updated_at, data) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 updated_at = excluded.updated_at,
                 data = excluded.data",
        )
        .bind(key)
        .bind(now.0 as i64)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;
        Ok(())
    }

    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::storage)?;

        match row {
            Some((data,)) => Ok(Some(
                serde_json::from_slice(&data).map_err(StoreError::serialization)?,
            )),
            None => Ok(None),
        }
    }

    pub async fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    /// Row count of one collection. Table names come from the fixed
    /// collection list, never from caller input.
    pub(crate) async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let n: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(n as u64)
    }

    pub(crate) async fn clear_collection(&self, table: &str) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {table}");
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    /// Wipes every collection, then re-stamps the schema version so the
    /// store stays ready without a reopen.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        for table in Self::collection_names() {
            self.clear_collection(table).await?;
        }
        self.put_value(SCHEMA_VERSION_KEY, &SCHEMA_VERSION, UnixTimeMs::now())
            .await
    }

    pub(crate) fn collection_names() -> impl Iterator<Item = &'static str> {
        REQUIRED_COLLECTIONS.iter().map(|(name, _)| *name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_every_collection() {
        let db = OfflineDb::open_in_memory().await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(db.pool())
                .await
                .unwrap();

        for (name, _) in REQUIRED_COLLECTIONS {
            assert!(tables.iter().any(|t| t == name), "missing {name}");
        }
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn reopen_preserves_existing_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offline.db");

        {
            let db = OfflineDb::open(&path).await.unwrap();
            db.put_value("greeting", "hello", UnixTimeMs(1)).await.unwrap();
        }

        let db = OfflineDb::open(&path).await.unwrap();
        let value: Option<String> = db.get_value("greeting").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn migration_only_adds_missing_collections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.db");

        // Seed a database that predates most collections: only kv exists,
        // with one row in it.
        {
            let options = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .unwrap();
            let kv_ddl = REQUIRED_COLLECTIONS
                .iter()
                .find(|(name, _)| *name == "kv")
                .unwrap()
                .1;
            sqlx::query(kv_ddl).execute(&pool).await.unwrap();
            sqlx::query("INSERT INTO kv (key, updated_at, data) VALUES ('old', 1, ?)")
                .bind(serde_json::to_vec(&42u32).unwrap())
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let db = OfflineDb::open(&path).await.unwrap();

        let old: Option<u32> = db.get_value("old").await.unwrap();
        assert_eq!(old, Some(42));
        assert_eq!(db.count("routes").await.unwrap(), 0);
        assert_eq!(db.count("sos_logs").await.unwrap(), 0);
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn kv_roundtrip_and_delete() {
        let db = OfflineDb::open_in_memory().await.unwrap();

        db.put_value("numbers", &vec![1u32, 2, 3], UnixTimeMs(10))
            .await
            .unwrap();
        let back: Option<Vec<u32>> = db.get_value("numbers").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        db.delete_value("numbers").await.unwrap();
        let gone: Option<Vec<u32>> = db.get_value("numbers").await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    async fn kv_upsert_latest_write_wins() {
        let db = OfflineDb::open_in_memory().await.unwrap();

        db.put_value("pref", "first", UnixTimeMs(1)).await.unwrap();
        db.put_value("pref", "second", UnixTimeMs(2)).await.unwrap();

        let value: Option<String> = db.get_value("pref").await.unwrap();
        assert_eq!(value.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn kv_wrong_type_read_is_serialization_error() {
        let db = OfflineDb::open_in_memory().await.unwrap();
        db.put_value("text", "not a number", UnixTimeMs(1))
            .await
            .unwrap();

        let result: Result<Option<u64>, _> = db.get_value("text").await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[tokio::test]
    async fn empty_kv_key_rejected() {
        let db = OfflineDb::open_in_memory().await.unwrap();
        let result = db.put_value("  ", "x", UnixTimeMs(1)).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn open_missing_parent_dir_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist").join("offline.db");

        let result = OfflineDb::open(&path).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn shared_handle_is_memoized() {
        let path = std::env::temp_dir().join(format!(
            "safetravel-shared-{}.db",
            uuid::Uuid::new_v4()
        ));

        let first = shared(&path).await.unwrap();
        let second = shared(&path).await.unwrap();
        assert!(std::ptr::eq(first, second));

        let _ = std::fs::remove_file(&path);
    }
}
