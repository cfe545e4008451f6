use tracing::{info, instrument};

use crate::geo::distance_km;
use crate::model::{CachedRoute, LatLon, RouteId, UnixTimeMs};
use crate::store::{OfflineDb, StoreError};
use crate::OfflineConfig;

pub const DEFAULT_MAX_ROUTES: usize = 20;
pub const DEFAULT_NEAREST_MAX_RESULTS: usize = 20;
pub const DEFAULT_NEAREST_MAX_DISTANCE_KM: f64 = 50.0;
pub const DEFAULT_MATCH_TOLERANCE_KM: f64 = 5.0;

/// Input for a route save. Id and timestamp are assigned at insert time.
#[derive(Clone, Debug)]
pub struct NewRoute {
    pub origin: LatLon,
    pub dest: LatLon,
    pub dest_name: String,
    pub dest_phone: String,
    pub dest_address: String,
    pub path: Vec<LatLon>,
    pub distance_km: f64,
    pub duration_secs: f64,
}

/// A cached route annotated with its distance from the query point.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteMatch {
    pub route: CachedRoute,
    pub distance_km: f64,
}

/// Saved navigation routes, capped oldest-first so repeated route searches
/// cannot grow the collection without bound.
pub struct RouteCache {
    db: OfflineDb,
    max_routes: usize,
}

impl RouteCache {
    pub fn new(db: &OfflineDb, config: &OfflineConfig) -> Self {
        Self {
            db: db.clone(),
            max_routes: config.max_routes,
        }
    }

    /// Always inserts a fresh record; saving the same destination twice
    /// yields two entries with distinct ids and timestamps.
    #[instrument(skip(self, route))]
    pub async fn save_route(&self, route: NewRoute, now: UnixTimeMs) -> Result<RouteId, StoreError> {
        validate_route(&route)?;
        let record = materialize(route, now);
        self.insert(&record).await?;
        self.enforce_retention().await?;
        Ok(record.id)
    }

    /// Bulk variant. All inputs are validated before anything is written, and
    /// the retention cap is enforced once after the batch.
    #[instrument(skip(self, routes), fields(count = routes.len()))]
    pub async fn save_routes(
        &self,
        routes: Vec<NewRoute>,
        now: UnixTimeMs,
    ) -> Result<Vec<RouteId>, StoreError> {
        for (i, route) in routes.iter().enumerate() {
            validate_route(route)
                .map_err(|e| StoreError::Validation(format!("route #{i}: {e}")))?;
        }

        let mut ids = Vec::with_capacity(routes.len());
        for route in routes {
            let record = materialize(route, now);
            self.insert(&record).await?;
            ids.push(record.id);
        }
        self.enforce_retention().await?;
        Ok(ids)
    }

    /// All cached routes in insertion order.
    pub async fn all(&self) -> Result<Vec<CachedRoute>, StoreError> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM routes ORDER BY rowid ASC")
            .fetch_all(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .collect()
    }

    pub async fn route(&self, id: &RouteId) -> Result<Option<CachedRoute>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM routes WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        row.map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .transpose()
    }

    /// The most recently inserted route, if any.
    pub async fn last_route(&self) -> Result<Option<CachedRoute>, StoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM routes ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(self.db.pool())
                .await
                .map_err(StoreError::storage)?;

        row.map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .transpose()
    }

    /// Cached routes whose destination lies within `max_distance_km` of the
    /// query point, closest first, at most `max_results`. Answers "what is
    /// cached near me" without touching the network.
    pub async fn nearest_routes(
        &self,
        user: LatLon,
        max_results: usize,
        max_distance_km: f64,
    ) -> Result<Vec<RouteMatch>, StoreError> {
        let mut matches: Vec<RouteMatch> = self
            .all()
            .await?
            .into_iter()
            .map(|route| RouteMatch {
                distance_km: distance_km(user, route.dest),
                route,
            })
            .filter(|m| m.distance_km <= max_distance_km)
            .collect();

        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        matches.truncate(max_results);
        Ok(matches)
    }

    /// Prefers the first cached route (insertion order) whose destination is
    /// within `tolerance_km` of the requested one; degrades to the single
    /// globally-nearest cached route rather than forcing a network round
    /// trip. `None` only when nothing is cached.
    pub async fn best_matching_route(
        &self,
        dest: LatLon,
        tolerance_km: f64,
    ) -> Result<Option<RouteMatch>, StoreError> {
        let candidates: Vec<RouteMatch> = self
            .all()
            .await?
            .into_iter()
            .map(|route| RouteMatch {
                distance_km: distance_km(dest, route.dest),
                route,
            })
            .collect();

        if let Some(exact) = candidates.iter().find(|m| m.distance_km < tolerance_km) {
            return Ok(Some(exact.clone()));
        }

        Ok(candidates
            .into_iter()
            .min_by(|a, b| a.distance_km.total_cmp(&b.distance_km)))
    }

    pub async fn delete_route(&self, id: &RouteId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM routes WHERE id = ?")
            .bind(id.as_str())
            .execute(self.db.pool())
            .await
            .map_err(StoreError::storage)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.db.clear_collection("routes").await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.db.count("routes").await
    }

    /// Deletes strictly the oldest-by-timestamp entries beyond the cap, ties
    /// broken by insertion order. Holds after every save, single or bulk.
    pub(crate) async fn enforce_retention(&self) -> Result<u64, StoreError> {
        let count = self.db.count("routes").await?;
        let cap = self.max_routes as u64;
        if count <= cap {
            return Ok(0);
        }

        let excess = (count - cap) as i64;
        let result = sqlx::query(
            "DELETE FROM routes WHERE id IN (
                 SELECT id FROM routes ORDER BY created_at ASC, rowid ASC LIMIT ?
             )",
        )
        .bind(excess)
        .execute(self.db.pool())
        .await
        .map_err(StoreError::storage)?;

        info!(evicted = result.rows_affected(), "route cache over cap, evicted oldest");
        Ok(result.rows_affected())
    }

    async fn insert(&self, route: &CachedRoute) -> Result<(), StoreError> {
        let data = serde_json::to_vec(route).map_err(StoreError::serialization)?;
        sqlx::query("INSERT INTO routes (id, created_at, data) VALUES (?, ?, ?)")
            .bind(route.id.as_str())
            .bind(route.created_at.0 as i64)
            .bind(data)
            .execute(self.db.pool())
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }
}

fn validate_route(route: &NewRoute) -> Result<(), StoreError> {
    if !route.distance_km.is_finite() || route.distance_km < 0.0 {
        return Err(StoreError::Validation(format!(
            "distance_km must be finite and >= 0, got {}",
            route.distance_km
        )));
    }
    if !route.duration_secs.is_finite() || route.duration_secs < 0.0 {
        return Err(StoreError::Validation(format!(
            "duration_secs must be finite and >= 0, got {}",
            route.duration_secs
        )));
    }
    Ok(())
}

fn materialize(route: NewRoute, now: UnixTimeMs) -> CachedRoute {
    CachedRoute {
        id: RouteId::generate(),
        origin: route.origin,
        dest: route.dest,
        dest_name: route.dest_name,
        dest_phone: route.dest_phone,
        dest_address: route.dest_address,
        path: route.path,
        distance_km: route.distance_km,
        duration_secs: route.duration_secs,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> LatLon {
        LatLon::new(lat, lon).unwrap()
    }

    fn route_to(name: &str, dest: LatLon) -> NewRoute {
        NewRoute {
            origin: p(21.0278, 105.8342),
            dest,
            dest_name: name.into(),
            dest_phone: "113".into(),
            dest_address: "1 Example St".into(),
            path: vec![p(21.0278, 105.8342), dest],
            distance_km: 12.5,
            duration_secs: 1800.0,
        }
    }

    async fn cache_with_cap(cap: usize) -> (OfflineDb, RouteCache) {
        let db = OfflineDb::open_in_memory().await.unwrap();
        let config = OfflineConfig {
            max_routes: cap,
            ..OfflineConfig::default()
        };
        let cache = RouteCache::new(&db, &config);
        (db, cache)
    }

    #[tokio::test]
    async fn save_and_read_back() {
        let (_db, cache) = cache_with_cap(20).await;

        let id = cache
            .save_route(route_to("hospital", p(21.03, 105.85)), UnixTimeMs(1000))
            .await
            .unwrap();

        let all = cache.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].dest_name, "hospital");
        assert_eq!(all[0].created_at, UnixTimeMs(1000));

        let by_id = cache.route(&id).await.unwrap().unwrap();
        assert_eq!(by_id, all[0]);
        assert!(cache.route(&RouteId("route-missing".into())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cap_holds_across_single_saves() {
        let (_db, cache) = cache_with_cap(20).await;

        for i in 1..=25u64 {
            cache
                .save_route(route_to(&format!("dest-{i}"), p(21.0, 105.0)), UnixTimeMs(i))
                .await
                .unwrap();
        }

        let all = cache.all().await.unwrap();
        assert_eq!(all.len(), 20);

        let names: Vec<&str> = all.iter().map(|r| r.dest_name.as_str()).collect();
        for i in 1..=5u64 {
            assert!(!names.contains(&format!("dest-{i}").as_str()), "dest-{i} survived");
        }
        for i in 6..=25u64 {
            assert!(names.contains(&format!("dest-{i}").as_str()), "dest-{i} evicted");
        }
    }

    #[tokio::test]
    async fn bulk_save_enforces_cap_once() {
        let (_db, cache) = cache_with_cap(3).await;

        let batch: Vec<NewRoute> = (1..=5)
            .map(|i| route_to(&format!("bulk-{i}"), p(21.0, 105.0)))
            .collect();
        let ids = cache.save_routes(batch, UnixTimeMs(100)).await.unwrap();
        assert_eq!(ids.len(), 5);

        // Same timestamp for the whole batch: insertion order breaks the tie.
        let all = cache.all().await.unwrap();
        assert_eq!(all.len(), 3);
        let names: Vec<&str> = all.iter().map(|r| r.dest_name.as_str()).collect();
        assert_eq!(names, vec!["bulk-3", "bulk-4", "bulk-5"]);
    }

    #[tokio::test]
    async fn nearest_routes_filters_sorts_and_limits() {
        let (_db, cache) = cache_with_cap(20).await;
        let user = p(21.0278, 105.8342);

        // ~0 km, ~55 km and ~20 km from the user.
        cache.save_route(route_to("here", user), UnixTimeMs(1)).await.unwrap();
        cache
            .save_route(route_to("far", p(21.5278, 105.8342)), UnixTimeMs(2))
            .await
            .unwrap();
        cache
            .save_route(route_to("mid", p(21.2078, 105.8342)), UnixTimeMs(3))
            .await
            .unwrap();

        let nearby = cache.nearest_routes(user, 20, 50.0).await.unwrap();
        let names: Vec<&str> = nearby.iter().map(|m| m.route.dest_name.as_str()).collect();
        assert_eq!(names, vec!["here", "mid"]);
        assert!(nearby[0].distance_km <= nearby[1].distance_km);

        let only_one = cache.nearest_routes(user, 1, 50.0).await.unwrap();
        assert_eq!(only_one.len(), 1);
        assert_eq!(only_one[0].route.dest_name, "here");
    }

    #[tokio::test]
    async fn best_match_prefers_first_within_tolerance() {
        let (_db, cache) = cache_with_cap(20).await;
        let dest = p(21.0278, 105.8342);

        // Both within 5 km of the query; the earlier insert wins even though
        // the later one is closer.
        cache
            .save_route(route_to("first", p(21.0478, 105.8342)), UnixTimeMs(1))
            .await
            .unwrap();
        cache.save_route(route_to("closer", dest), UnixTimeMs(2)).await.unwrap();

        let best = cache.best_matching_route(dest, 5.0).await.unwrap().unwrap();
        assert_eq!(best.route.dest_name, "first");
        assert!(best.distance_km < 5.0);
    }

    #[tokio::test]
    async fn best_match_falls_back_to_global_nearest() {
        let (_db, cache) = cache_with_cap(20).await;
        let dest = p(21.0278, 105.8342);

        cache
            .save_route(route_to("nearest", p(21.5278, 105.8342)), UnixTimeMs(1))
            .await
            .unwrap();
        cache
            .save_route(route_to("farther", p(22.0278, 105.8342)), UnixTimeMs(2))
            .await
            .unwrap();

        let best = cache.best_matching_route(dest, 5.0).await.unwrap().unwrap();
        assert_eq!(best.route.dest_name, "nearest");
        assert!(best.distance_km > 5.0);
    }

    #[tokio::test]
    async fn best_match_empty_cache_is_none() {
        let (_db, cache) = cache_with_cap(20).await;
        let best = cache
            .best_matching_route(p(21.0, 105.0), 5.0)
            .await
            .unwrap();
        assert!(best.is_none());
    }

    #[tokio::test]
    async fn invalid_distance_rejected_without_insert() {
        let (_db, cache) = cache_with_cap(20).await;

        let mut bad = route_to("bad", p(21.0, 105.0));
        bad.distance_km = f64::NAN;
        let result = cache.save_route(bad, UnixTimeMs(1)).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        let mut negative = route_to("negative", p(21.0, 105.0));
        negative.duration_secs = -1.0;
        let result = cache.save_route(negative, UnixTimeMs(2)).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));

        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (_db, cache) = cache_with_cap(20).await;

        let id = cache
            .save_route(route_to("a", p(21.0, 105.0)), UnixTimeMs(1))
            .await
            .unwrap();
        cache
            .save_route(route_to("b", p(21.1, 105.0)), UnixTimeMs(2))
            .await
            .unwrap();

        assert!(cache.delete_route(&id).await.unwrap());
        assert!(!cache.delete_route(&id).await.unwrap());
        assert_eq!(cache.count().await.unwrap(), 1);

        cache.clear().await.unwrap();
        assert_eq!(cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn last_route_is_most_recent_insert() {
        let (_db, cache) = cache_with_cap(20).await;
        assert!(cache.last_route().await.unwrap().is_none());

        cache.save_route(route_to("a", p(21.0, 105.0)), UnixTimeMs(1)).await.unwrap();
        cache.save_route(route_to("b", p(21.1, 105.0)), UnixTimeMs(2)).await.unwrap();

        let last = cache.last_route().await.unwrap().unwrap();
        assert_eq!(last.dest_name, "b");
    }
}
