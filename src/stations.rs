use tracing::{info, instrument};

use crate::geo::distance_km;
use crate::model::{LatLon, RescueStation, StationId, UnixTimeMs};
use crate::store::{OfflineDb, StoreError};

/// Station data as it arrives from a directory pull, before ids and the
/// batch stamp are assigned.
#[derive(Clone, Debug)]
pub struct NewStation {
    pub name: String,
    pub kind: String,
    pub phone: String,
    pub location: LatLon,
    pub address: String,
}

/// Local mirror of the backend rescue-station directory.
///
/// A sync replaces the whole collection in one transaction rather than
/// merging, so a station removed upstream never lingers locally.
pub struct RescueStationDirectory {
    db: OfflineDb,
}

impl RescueStationDirectory {
    pub fn new(db: &OfflineDb) -> Self {
        Self { db: db.clone() }
    }

    /// Clear-then-bulk-insert inside one transaction. Ids are `station-{i}`,
    /// stable within the batch; every record carries the same batch stamp.
    /// On any failure the transaction rolls back and the previous snapshot
    /// stays intact.
    #[instrument(skip(self, stations), fields(count = stations.len()))]
    pub async fn replace_all(
        &self,
        stations: Vec<NewStation>,
        now: UnixTimeMs,
    ) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await.map_err(StoreError::storage)?;

        sqlx::query("DELETE FROM rescue_stations")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::storage)?;

        let count = stations.len();
        for (i, station) in stations.into_iter().enumerate() {
            let record = RescueStation {
                id: StationId(format!("station-{i}")),
                name: station.name,
                kind: station.kind,
                phone: station.phone,
                location: station.location,
                address: station.address,
                batch_at: now,
            };
            let data = serde_json::to_vec(&record).map_err(StoreError::serialization)?;
            sqlx::query("INSERT INTO rescue_stations (id, batch_at, data) VALUES (?, ?, ?)")
                .bind(record.id.as_str())
                .bind(record.batch_at.0 as i64)
                .bind(data)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::storage)?;
        }

        tx.commit().await.map_err(StoreError::storage)?;
        info!(count, "replaced rescue station directory");
        Ok(count)
    }

    pub async fn all(&self) -> Result<Vec<RescueStation>, StoreError> {
        let rows: Vec<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM rescue_stations ORDER BY rowid ASC")
                .fetch_all(self.db.pool())
                .await
                .map_err(StoreError::storage)?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .collect()
    }

    /// Stations of one kind (hospital, police, townhall, ...).
    pub async fn by_type(&self, kind: &str) -> Result<Vec<RescueStation>, StoreError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|s| s.kind == kind)
            .collect())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.db.clear_collection("rescue_stations").await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.db.count("rescue_stations").await
    }
}

/// Closest station to the user, or `None` for an empty slice. Pure, so the
/// SOS screen can run it over an already-loaded list without a store round
/// trip.
pub fn nearest_station(stations: &[RescueStation], user: LatLon) -> Option<&RescueStation> {
    stations
        .iter()
        .min_by(|a, b| distance_km(user, a.location).total_cmp(&distance_km(user, b.location)))
}
