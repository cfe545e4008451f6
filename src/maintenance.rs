use tracing::{info, instrument};

use crate::model::UnixTimeMs;
use crate::routes::RouteCache;
use crate::sos::SosLogQueue;
use crate::store::{OfflineDb, StoreError};
use crate::tiles::TileCache;
use crate::OfflineConfig;

// Per-record size heuristics for the non-binary collections. Rough by
// intent: the figure feeds a settings-screen readout, not a quota.
pub const ROUTE_RECORD_ESTIMATE_BYTES: u64 = 2048;
pub const CONTACT_RECORD_ESTIMATE_BYTES: u64 = 256;
pub const SOS_RECORD_ESTIMATE_BYTES: u64 = 512;
pub const STATION_RECORD_ESTIMATE_BYTES: u64 = 256;

/// Per-collection counts plus the estimated storage footprint.
#[derive(Clone, Debug, PartialEq)]
pub struct OfflineStats {
    pub routes: u64,
    pub tiles: u64,
    pub contacts: u64,
    pub sos_logs: u64,
    pub pending_sos: u64,
    pub stations: u64,
    pub estimated_size_mb: f64,
}

/// Counts every collection and estimates the footprint: fixed per-record
/// weights for JSON collections, actual byte sizes for tile payloads.
pub async fn offline_stats(db: &OfflineDb) -> Result<OfflineStats, StoreError> {
    let routes = db.count("routes").await?;
    let tiles = db.count("tiles").await?;
    let contacts = db.count("contacts").await?;
    let sos_logs = db.count("sos_logs").await?;
    let stations = db.count("rescue_stations").await?;
    let pending_sos = SosLogQueue::new(db).pending_count().await?;
    let tile_bytes = TileCache::new(db).total_image_bytes().await?;

    let estimated_bytes = routes * ROUTE_RECORD_ESTIMATE_BYTES
        + tile_bytes
        + contacts * CONTACT_RECORD_ESTIMATE_BYTES
        + sos_logs * SOS_RECORD_ESTIMATE_BYTES
        + stations * STATION_RECORD_ESTIMATE_BYTES;

    Ok(OfflineStats {
        routes,
        tiles,
        contacts,
        sos_logs,
        pending_sos,
        stations,
        estimated_size_mb: to_mb(estimated_bytes),
    })
}

fn to_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}

/// Age-based tile cleanup plus the route retention pass. Safe to call at any
/// time, including on a schedule.
#[instrument(skip(db, config))]
pub async fn optimize_storage(
    db: &OfflineDb,
    config: &OfflineConfig,
    now: UnixTimeMs,
) -> Result<(), StoreError> {
    let tiles_removed = TileCache::new(db)
        .clean_old_tiles(now, config.tile_max_age)
        .await?;
    let routes_evicted = RouteCache::new(db, config).enforce_retention().await?;
    info!(tiles_removed, routes_evicted, "storage optimized");
    Ok(())
}

/// Wipes every collection. User-initiated reset only.
#[instrument(skip(db))]
pub async fn clear_all_offline_data(db: &OfflineDb) -> Result<(), StoreError> {
    db.clear_all().await?;
    info!("offline data cleared");
    Ok(())
}
