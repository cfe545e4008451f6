//! Offline cache and sync core for the SafeTravel companion app.
//!
//! Everything the app needs to keep working without a network lives here:
//! a durable collection store ([`store::OfflineDb`]), the cached-route and
//! map-tile managers, the SOS log queue that records a distress trigger
//! before any network call is attempted, local mirrors of the emergency
//! contacts and rescue-station directory, and the [`sync::SyncEngine`] that
//! reconciles all of it with the backend when connectivity returns.
//!
//! Rendering, routing computation, geolocation and notification UI are the
//! host app's problem; this crate only stores, queries and syncs.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod backend;
pub mod contacts;
pub mod geo;
pub mod maintenance;
pub mod model;
pub mod routes;
pub mod sos;
pub mod stations;
pub mod store;
pub mod sync;
pub mod tiles;

use std::time::Duration;

pub use backend::{BackendApi, BackendError, HttpBackend};
pub use contacts::ContactStore;
pub use geo::distance_km;
pub use maintenance::{clear_all_offline_data, offline_stats, optimize_storage, OfflineStats};
pub use model::{
    CachedRoute, CachedTile, EmergencyContactRecord, LatLon, RescueStation, SosLogEntry,
    SosStatus, UnixTimeMs,
};
pub use routes::{NewRoute, RouteCache, RouteMatch};
pub use sos::SosLogQueue;
pub use stations::{nearest_station, RescueStationDirectory};
pub use store::{shared, OfflineDb, StoreError};
pub use sync::{ItemOutcome, SyncEngine, SyncError, SyncReport};
pub use tiles::TileCache;

/// Tunables for the offline subsystem. The defaults match what the app
/// ships with; `validate` guards against configs that would disable caching
/// outright.
#[derive(Clone, Debug)]
pub struct OfflineConfig {
    /// Retention cap for cached routes, enforced oldest-first.
    pub max_routes: usize,
    /// Tiles older than this are dropped by the maintenance sweep.
    pub tile_max_age: Duration,
    /// Deadline applied to every backend request.
    pub request_timeout: Duration,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_routes: routes::DEFAULT_MAX_ROUTES,
            tile_max_age: tiles::DEFAULT_TILE_MAX_AGE,
            request_timeout: backend::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl OfflineConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_routes == 0 {
            return Err(StoreError::Validation("max_routes must be > 0".into()));
        }
        if self.tile_max_age.is_zero() {
            return Err(StoreError::Validation("tile_max_age must be > 0".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(StoreError::Validation("request_timeout must be > 0".into()));
        }
        Ok(())
    }
}
