use tracing::{info, instrument};

use crate::model::{LatLon, SosLogEntry, SosLogId, SosStatus, UnixTimeMs};
use crate::store::{OfflineDb, StoreError};

const STATUS_PENDING: &str = "pending";
const STATUS_SYNCED: &str = "synced";

/// Durable queue of SOS trigger attempts.
///
/// An entry is written locally the instant a trigger is initiated, before
/// any network call, so a crash, a closed tab or airplane mode never loses
/// the intent to call for help. Entries only ever move `Pending -> Synced`,
/// on backend acknowledgement; a failed replay leaves the entry pending for
/// the next sync cycle.
pub struct SosLogQueue {
    db: OfflineDb,
}

impl SosLogQueue {
    pub fn new(db: &OfflineDb) -> Self {
        Self { db: db.clone() }
    }

    /// Records the attempt locally and returns its id. Must be awaited to
    /// completion before the live SOS request goes out.
    #[instrument(skip_all)]
    pub async fn record_attempt(
        &self,
        location: LatLon,
        medical_notes: Option<String>,
        rescue_station: Option<String>,
        now: UnixTimeMs,
    ) -> Result<SosLogId, StoreError> {
        let entry = SosLogEntry {
            id: SosLogId::generate(),
            location,
            medical_notes,
            rescue_station,
            created_at: now,
            status: SosStatus::Pending,
        };

        let data = serde_json::to_vec(&entry).map_err(StoreError::serialization)?;
        sqlx::query("INSERT INTO sos_logs (id, created_at, status, data) VALUES (?, ?, ?, ?)")
            .bind(entry.id.as_str())
            .bind(entry.created_at.0 as i64)
            .bind(STATUS_PENDING)
            .bind(data)
            .execute(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        info!(id = entry.id.as_str(), "recorded sos attempt");
        Ok(entry.id)
    }

    /// All pending entries, oldest first (the replay order).
    pub async fn pending(&self) -> Result<Vec<SosLogEntry>, StoreError> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as(
            "SELECT data FROM sos_logs WHERE status = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(STATUS_PENDING)
        .fetch_all(self.db.pool())
        .await
        .map_err(StoreError::storage)?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .collect()
    }

    pub async fn pending_count(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sos_logs WHERE status = ?")
            .bind(STATUS_PENDING)
            .fetch_one(self.db.pool())
            .await
            .map_err(StoreError::storage)?;
        Ok(n as u64)
    }

    pub async fn all(&self) -> Result<Vec<SosLogEntry>, StoreError> {
        let rows: Vec<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM sos_logs ORDER BY created_at ASC, rowid ASC")
                .fetch_all(self.db.pool())
                .await
                .map_err(StoreError::storage)?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .collect()
    }

    pub async fn get(&self, id: &SosLogId) -> Result<Option<SosLogEntry>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM sos_logs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        row.map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .transpose()
    }

    /// `Pending -> Synced` on backend acknowledgement. Idempotent: marking
    /// an already-synced or unknown id is a no-op, not an error.
    #[instrument(skip(self), fields(id = id.as_str()))]
    pub async fn mark_synced(&self, id: &SosLogId) -> Result<(), StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM sos_logs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        let Some((data,)) = row else {
            return Ok(());
        };
        let mut entry: SosLogEntry =
            serde_json::from_slice(&data).map_err(StoreError::serialization)?;
        if entry.status == SosStatus::Synced {
            return Ok(());
        }

        entry.status = SosStatus::Synced;
        let data = serde_json::to_vec(&entry).map_err(StoreError::serialization)?;
        sqlx::query("UPDATE sos_logs SET status = ?, data = ? WHERE id = ?")
            .bind(STATUS_SYNCED)
            .bind(data)
            .bind(id.as_str())
            .execute(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        info!("sos entry synced");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.db.clear_collection("sos_logs").await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.db.count("sos_logs").await
    }
}
