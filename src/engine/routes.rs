//! Route and stop administration.
//!
//! Stops carry a sequence index that must stay a contiguous 0..n-1
//! permutation per route; every mutation ends with a resequencing pass
//! inside the same transaction.

use sqlx::{Sqlite, SqlitePool, Transaction};

use super::error::EngineError;
use super::types::{RouteRecord, Stop};

#[derive(Debug, Clone)]
pub struct NewStop {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone)]
pub struct RouteStore {
    pool: SqlitePool,
}

impl RouteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: String,
        school_id: Option<i64>,
        stops: Vec<NewStop>,
    ) -> Result<RouteRecord, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("route name must not be empty".into()));
        }
        for stop in &stops {
            validate_stop(stop)?;
        }

        let mut tx = self.pool.begin().await?;
        let route_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO routes (name, school_id) VALUES (?, ?) RETURNING id",
        )
        .bind(&name)
        .bind(school_id)
        .fetch_one(&mut *tx)
        .await?;

        for (sequence, stop) in stops.iter().enumerate() {
            sqlx::query(
                "INSERT INTO stops (route_id, name, lat, lon, sequence) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(route_id)
            .bind(&stop.name)
            .bind(stop.lat)
            .bind(stop.lon)
            .bind(sequence as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(RouteRecord {
            id: route_id,
            name,
            school_id,
        })
    }

    pub async fn list(&self) -> Result<Vec<RouteRecord>, EngineError> {
        let routes = sqlx::query_as("SELECT id, name, school_id FROM routes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(routes)
    }

    pub async fn get(&self, id: i64) -> Result<RouteRecord, EngineError> {
        sqlx::query_as("SELECT id, name, school_id FROM routes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::not_found("route", id))
    }

    /// Stops of a route, ordered by sequence. Errors when the route itself
    /// does not exist, so callers can distinguish "no stops" from "no route".
    pub async fn stops(&self, route_id: i64) -> Result<Vec<Stop>, EngineError> {
        self.get(route_id).await?;
        let stops = sqlx::query_as(
            "SELECT id, route_id, name, lat, lon, sequence FROM stops WHERE route_id = ? ORDER BY sequence",
        )
        .bind(route_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(stops)
    }

    /// Insert a stop at `position` (clamped; append when omitted) and
    /// resequence the route.
    pub async fn add_stop(
        &self,
        route_id: i64,
        stop: NewStop,
        position: Option<i64>,
    ) -> Result<Vec<Stop>, EngineError> {
        validate_stop(&stop)?;
        let existing = self.stops(route_id).await?;
        let insert_at = position
            .unwrap_or(existing.len() as i64)
            .clamp(0, existing.len() as i64);

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE stops SET sequence = sequence + 1 WHERE route_id = ? AND sequence >= ?")
            .bind(route_id)
            .bind(insert_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO stops (route_id, name, lat, lon, sequence) VALUES (?, ?, ?, ?, ?)")
            .bind(route_id)
            .bind(&stop.name)
            .bind(stop.lat)
            .bind(stop.lon)
            .bind(insert_at)
            .execute(&mut *tx)
            .await?;
        resequence(&mut tx, route_id).await?;
        tx.commit().await?;

        self.stops(route_id).await
    }

    pub async fn remove_stop(&self, route_id: i64, stop_id: i64) -> Result<Vec<Stop>, EngineError> {
        self.get(route_id).await?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM stops WHERE route_id = ? AND id = ?")
            .bind(route_id)
            .bind(stop_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("stop", stop_id));
        }
        resequence(&mut tx, route_id).await?;
        tx.commit().await?;

        self.stops(route_id).await
    }

    /// Reorder the route to exactly the given stop ids. The list must be a
    /// permutation of the route's current stops.
    pub async fn reorder_stops(
        &self,
        route_id: i64,
        stop_ids: Vec<i64>,
    ) -> Result<Vec<Stop>, EngineError> {
        let existing = self.stops(route_id).await?;
        let mut current: Vec<i64> = existing.iter().map(|s| s.id).collect();
        let mut requested = stop_ids.clone();
        current.sort_unstable();
        requested.sort_unstable();
        if current != requested {
            return Err(EngineError::Validation(
                "reorder list must be a permutation of the route's stops".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        for (sequence, stop_id) in stop_ids.iter().enumerate() {
            sqlx::query("UPDATE stops SET sequence = ? WHERE route_id = ? AND id = ?")
                .bind(sequence as i64)
                .bind(route_id)
                .bind(stop_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.stops(route_id).await
    }
}

fn validate_stop(stop: &NewStop) -> Result<(), EngineError> {
    if stop.name.trim().is_empty() {
        return Err(EngineError::Validation("stop name must not be empty".into()));
    }
    if !super::geofence::valid_coordinates(stop.lat, stop.lon) {
        return Err(EngineError::Validation(format!(
            "malformed coordinates ({}, {})",
            stop.lat, stop.lon
        )));
    }
    Ok(())
}

/// Rewrite sequences as 0..n-1 in current order.
async fn resequence(tx: &mut Transaction<'_, Sqlite>, route_id: i64) -> Result<(), EngineError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM stops WHERE route_id = ? ORDER BY sequence, id",
    )
    .bind(route_id)
    .fetch_all(&mut **tx)
    .await?;
    for (sequence, id) in ids.iter().enumerate() {
        sqlx::query("UPDATE stops SET sequence = ? WHERE id = ?")
            .bind(sequence as i64)
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> RouteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        RouteStore::new(pool)
    }

    fn new_stop(name: &str, lon: f64) -> NewStop {
        NewStop {
            name: name.to_string(),
            lat: 0.0,
            lon,
        }
    }

    fn assert_contiguous(stops: &[Stop]) {
        let sequences: Vec<i64> = stops.iter().map(|s| s.sequence).collect();
        let expected: Vec<i64> = (0..stops.len() as i64).collect();
        assert_eq!(sequences, expected);
    }

    #[tokio::test]
    async fn create_assigns_contiguous_sequences() {
        let store = test_store().await;
        let route = store
            .create(
                "north loop".into(),
                Some(10),
                vec![new_stop("a", 0.0), new_stop("b", 1.0), new_stop("c", 2.0)],
            )
            .await
            .unwrap();
        let stops = store.stops(route.id).await.unwrap();
        assert_eq!(stops.len(), 3);
        assert_contiguous(&stops);
    }

    #[tokio::test]
    async fn add_remove_reorder_keep_sequences_contiguous() {
        let store = test_store().await;
        let route = store
            .create(
                "loop".into(),
                None,
                vec![new_stop("a", 0.0), new_stop("b", 1.0)],
            )
            .await
            .unwrap();

        // Insert in the middle.
        let stops = store
            .add_stop(route.id, new_stop("between", 0.5), Some(1))
            .await
            .unwrap();
        assert_contiguous(&stops);
        assert_eq!(stops[1].name, "between");

        // Append.
        let stops = store.add_stop(route.id, new_stop("end", 2.0), None).await.unwrap();
        assert_contiguous(&stops);
        assert_eq!(stops[3].name, "end");

        // Remove one.
        let removed_id = stops[1].id;
        let stops = store.remove_stop(route.id, removed_id).await.unwrap();
        assert_contiguous(&stops);
        assert!(stops.iter().all(|s| s.id != removed_id));

        // Reorder reversed.
        let reversed: Vec<i64> = stops.iter().rev().map(|s| s.id).collect();
        let stops = store.reorder_stops(route.id, reversed.clone()).await.unwrap();
        assert_contiguous(&stops);
        assert_eq!(stops.iter().map(|s| s.id).collect::<Vec<_>>(), reversed);
    }

    #[tokio::test]
    async fn reorder_rejects_non_permutations() {
        let store = test_store().await;
        let route = store
            .create(
                "loop".into(),
                None,
                vec![new_stop("a", 0.0), new_stop("b", 1.0)],
            )
            .await
            .unwrap();
        let stops = store.stops(route.id).await.unwrap();

        let err = store
            .reorder_stops(route.id, vec![stops[0].id])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = store
            .reorder_stops(route.id, vec![stops[0].id, 999])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let store = test_store().await;
        let err = store.stops(42).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
        let err = store.remove_stop(42, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn stop_validation() {
        let store = test_store().await;
        let err = store
            .create("r".into(), None, vec![new_stop("bad", 200.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = store.create("  ".into(), None, vec![]).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
