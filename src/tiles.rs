use std::time::Duration;

use tracing::{info, instrument};

use crate::model::{CachedTile, UnixTimeMs};
use crate::store::{OfflineDb, StoreError};

/// Default tile retention.
pub const DEFAULT_TILE_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Map tile images keyed by source URL. Reads stay a primary-key lookup;
/// aging happens in the maintenance sweep, never on the read path.
pub struct TileCache {
    db: OfflineDb,
}

impl TileCache {
    pub fn new(db: &OfflineDb) -> Self {
        Self { db: db.clone() }
    }

    /// Upsert by URL; the latest write wins.
    pub async fn save_tile(
        &self,
        url: &str,
        image: Vec<u8>,
        now: UnixTimeMs,
    ) -> Result<(), StoreError> {
        if url.trim().is_empty() {
            return Err(StoreError::Validation("tile url cannot be empty".into()));
        }
        sqlx::query(
            "INSERT INTO tiles (url, image, fetched_at) VALUES (?, ?, ?)
             ON CONFLICT(url) DO UPDATE SET
                 image = excluded.image,
                 fetched_at = excluded.fetched_at",
        )
        .bind(url)
        .bind(image)
        .bind(now.0 as i64)
        .execute(self.db.pool())
        .await
        .map_err(StoreError::storage)?;
        Ok(())
    }

    pub async fn cached_tile(&self, url: &str) -> Result<Option<CachedTile>, StoreError> {
        let row: Option<(Vec<u8>, i64)> =
            sqlx::query_as("SELECT image, fetched_at FROM tiles WHERE url = ?")
                .bind(url)
                .fetch_optional(self.db.pool())
                .await
                .map_err(StoreError::storage)?;

        Ok(row.map(|(image, fetched_at)| CachedTile {
            url: url.to_string(),
            image,
            fetched_at: UnixTimeMs(fetched_at as u64),
        }))
    }

    /// Deletes every tile fetched before `now - max_age`. Returns the number
    /// of tiles removed.
    #[instrument(skip(self))]
    pub async fn clean_old_tiles(
        &self,
        now: UnixTimeMs,
        max_age: Duration,
    ) -> Result<u64, StoreError> {
        let cutoff = now.saturating_sub_ms(max_age.as_millis() as u64);
        let result = sqlx::query("DELETE FROM tiles WHERE fetched_at < ?")
            .bind(cutoff.0 as i64)
            .execute(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        if result.rows_affected() > 0 {
            info!(removed = result.rows_affected(), "expired old tiles");
        }
        Ok(result.rows_affected())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.db.clear_collection("tiles").await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.db.count("tiles").await
    }

    /// Actual stored payload bytes, for the storage estimate.
    pub(crate) async fn total_image_bytes(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(LENGTH(image)), 0) FROM tiles")
            .fetch_one(self.db.pool())
            .await
            .map_err(StoreError::storage)?;
        Ok(total as u64)
    }
}
