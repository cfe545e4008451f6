use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validated lat/lon.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    lat: f64,
    lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        if !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }

    pub fn saturating_sub_ms(&self, ms: u64) -> Self {
        Self(self.0.saturating_sub(ms))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteId(pub String);

impl RouteId {
    pub fn generate() -> Self {
        Self(format!("route-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SosLogId(pub String);

impl SosLogId {
    pub fn generate() -> Self {
        Self(format!("sos-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

impl ContactId {
    pub fn generate() -> Self {
        Self(format!("contact-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationId(pub String);

impl StationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A navigation route kept for offline replay. Inserted on every successful
/// route computation, evicted oldest-first once the collection cap is hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedRoute {
    pub id: RouteId,
    pub origin: LatLon,
    pub dest: LatLon,
    pub dest_name: String,
    pub dest_phone: String,
    pub dest_address: String,
    /// Ordered path from origin to destination.
    pub path: Vec<LatLon>,
    pub distance_km: f64,
    pub duration_secs: f64,
    pub created_at: UnixTimeMs,
}

/// Map tile payload keyed by source URL. Latest write wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedTile {
    pub url: String,
    pub image: Vec<u8>,
    pub fetched_at: UnixTimeMs,
}

/// Local mirror of an emergency contact. The backend copy is authoritative
/// once a sync has pushed it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContactRecord {
    pub id: ContactId,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub relation: String,
    pub saved_at: UnixTimeMs,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SosStatus {
    Pending,
    Synced,
}

/// One SOS trigger attempt. Written locally before any network call so the
/// intent survives a crash or an offline period; only ever moves
/// `Pending -> Synced`, and stays pending across any number of failed
/// replays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SosLogEntry {
    pub id: SosLogId,
    pub location: LatLon,
    pub medical_notes: Option<String>,
    /// Informational label, not a checked reference.
    pub rescue_station: Option<String>,
    pub created_at: UnixTimeMs,
    pub status: SosStatus,
}

/// Rescue station mirrored from the backend directory. Ids are stable within
/// one sync batch; a new batch replaces the whole collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RescueStation {
    pub id: StationId,
    pub name: String,
    pub kind: String,
    pub phone: String,
    pub location: LatLon,
    pub address: String,
    pub batch_at: UnixTimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latlon_rejects_out_of_range() {
        assert!(LatLon::new(91.0, 0.0).is_none());
        assert!(LatLon::new(-91.0, 0.0).is_none());
        assert!(LatLon::new(0.0, 181.0).is_none());
        assert!(LatLon::new(0.0, -181.0).is_none());
    }

    #[test]
    fn latlon_rejects_non_finite() {
        assert!(LatLon::new(f64::NAN, 0.0).is_none());
        assert!(LatLon::new(0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn latlon_accepts_bounds() {
        assert!(LatLon::new(90.0, 180.0).is_some());
        assert!(LatLon::new(-90.0, -180.0).is_some());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RouteId::generate(), RouteId::generate());
        assert_ne!(SosLogId::generate(), SosLogId::generate());
    }

    #[test]
    fn sos_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SosStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&SosStatus::Synced).unwrap(),
            "\"synced\""
        );
    }
}
