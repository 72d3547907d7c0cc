//! The trip lifecycle and attendance reconciliation engine.
//!
//! Owns all domain state: trips live in the in-memory registry, routes and
//! attendance in SQLite. The API layer and the background managers only
//! ever call through `Engine`.

pub mod attendance;
pub mod error;
pub mod geofence;
pub mod lifecycle;
pub mod routes;
pub mod stats;
pub mod types;

pub use error::EngineError;

use sqlx::SqlitePool;
use tracing::debug;

use attendance::AttendanceStore;
use geofence::GeofenceConfig;
use lifecycle::TripRegistry;
use routes::RouteStore;
use types::{PositionReport, StopEvent, Trip, TripStatus};

pub struct Engine {
    pub trips: TripRegistry,
    pub attendance: AttendanceStore,
    pub routes: RouteStore,
    geofence: GeofenceConfig,
}

impl Engine {
    pub fn new(pool: SqlitePool, geofence: GeofenceConfig) -> Self {
        Self {
            trips: TripRegistry::new(),
            attendance: AttendanceStore::new(pool.clone()),
            routes: RouteStore::new(pool),
            geofence,
        }
    }

    /// Feed one position sample into a trip. The route's stops are fetched
    /// before the per-trip lock is taken so no I/O happens under the lock.
    pub async fn ingest_position(
        &self,
        trip_id: i64,
        report: PositionReport,
    ) -> Result<(Trip, Vec<StopEvent>), EngineError> {
        let trip = self.trips.get(trip_id).await?;
        if trip.status != TripStatus::Active {
            return Err(EngineError::InvalidState {
                trip_id,
                status: trip.status,
            });
        }
        let stops = self.routes.stops(trip.route_id).await?;
        let (trip, events) = self
            .trips
            .apply_position(trip_id, &stops, report, &self.geofence)
            .await?;
        for event in &events {
            debug!(
                trip_id,
                stop_id = event.stop_id,
                sequence = event.sequence,
                kind = ?event.kind,
                "Stop event"
            );
        }
        Ok((trip, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lifecycle::NewTrip;
    use crate::engine::routes::NewStop;
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_engine() -> Engine {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        Engine::new(pool, GeofenceConfig::default())
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn report(lat: f64, lon: f64, secs: i64) -> PositionReport {
        PositionReport {
            lat,
            lon,
            timestamp: ts(secs),
        }
    }

    #[tokio::test]
    async fn a_full_trip_drives_through_its_route() {
        let engine = test_engine().await;
        let route = engine
            .routes
            .create(
                "equator line".into(),
                Some(10),
                vec![
                    NewStop { name: "a".into(), lat: 0.0, lon: 0.0 },
                    NewStop { name: "b".into(), lat: 0.0, lon: 1.0 },
                    NewStop { name: "c".into(), lat: 0.0, lon: 2.0 },
                ],
            )
            .await
            .unwrap();

        let trip = engine
            .trips
            .create(NewTrip {
                route_id: route.id,
                vehicle_id: 5,
                driver_id: 900,
                scheduled_departure: ts(0),
                scheduled_arrival: ts(3600),
            })
            .await;
        engine.trips.start(trip.id, ts(0)).await.unwrap();

        let samples = [
            (0.0, 0.0),
            (0.0, 0.5),
            (0.0, 1.0),
            (0.0, 1.5),
            (0.0, 2.0),
            (0.0, 2.01), // exit the final stop
        ];
        let mut arrivals = Vec::new();
        for (i, (lat, lon)) in samples.into_iter().enumerate() {
            let (_, events) = engine
                .ingest_position(trip.id, report(lat, lon, i as i64 * 60))
                .await
                .unwrap();
            arrivals.extend(
                events
                    .iter()
                    .filter(|e| e.kind == types::StopEventKind::Arrived)
                    .map(|e| e.sequence),
            );
        }
        assert_eq!(arrivals, vec![0, 1, 2]);

        let trip = engine.trips.get(trip.id).await.unwrap();
        assert_eq!(trip.status, TripStatus::Completed);

        // Completed trips no longer accept reports.
        let err = engine
            .ingest_position(trip.id, report(0.0, 2.0, 1000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }
}
