//! Trip lifecycle ownership.
//!
//! The registry is the single owner of every `Trip`: all state transitions
//! go through it, everything else reads snapshots. Position reports for one
//! trip serialize on that trip's mutex; distinct trips proceed in parallel.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::error::EngineError;
use super::geofence::{self, GeofenceConfig};
use super::types::{
    PositionReport, Stop, StopEvent, StopEventKind, StopState, Trip, TripStatus,
};

/// The legal-transition table. The only authority on trip status writes;
/// administrative overrides go through it as well.
pub fn transition_allowed(from: TripStatus, to: TripStatus) -> bool {
    use TripStatus::*;
    matches!(
        (from, to),
        (Scheduled, Active) | (Scheduled, Cancelled) | (Active, Completed) | (Active, Cancelled)
    )
}

#[derive(Debug, Clone)]
pub struct NewTrip {
    pub route_id: i64,
    pub vehicle_id: i64,
    pub driver_id: i64,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
}

pub struct TripRegistry {
    trips: RwLock<HashMap<i64, Arc<Mutex<Trip>>>>,
    /// vehicle id -> its single ACTIVE trip
    active_by_vehicle: Mutex<HashMap<i64, i64>>,
    next_id: AtomicI64,
}

impl TripRegistry {
    pub fn new() -> Self {
        Self {
            trips: RwLock::new(HashMap::new()),
            active_by_vehicle: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn create(&self, new: NewTrip) -> Trip {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let trip = Trip {
            id,
            route_id: new.route_id,
            vehicle_id: new.vehicle_id,
            driver_id: new.driver_id,
            status: TripStatus::Scheduled,
            scheduled_departure: new.scheduled_departure,
            scheduled_arrival: new.scheduled_arrival,
            started_at: None,
            ended_at: None,
            students: BTreeSet::new(),
            last_position: None,
            progress: Default::default(),
            cancel_reason: None,
        };
        self.trips
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(trip.clone())));
        info!(trip_id = id, route_id = new.route_id, vehicle_id = new.vehicle_id, "Trip scheduled");
        trip
    }

    async fn handle(&self, id: i64) -> Result<Arc<Mutex<Trip>>, EngineError> {
        self.trips
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("trip", id))
    }

    pub async fn get(&self, id: i64) -> Result<Trip, EngineError> {
        let handle = self.handle(id).await?;
        let trip = handle.lock().await;
        Ok(trip.clone())
    }

    pub async fn list(&self) -> Vec<Trip> {
        let handles: Vec<_> = self.trips.read().await.values().cloned().collect();
        let mut trips = Vec::with_capacity(handles.len());
        for handle in handles {
            trips.push(handle.lock().await.clone());
        }
        trips.sort_by_key(|t| t.id);
        trips
    }

    pub async fn start(&self, id: i64, at: DateTime<Utc>) -> Result<Trip, EngineError> {
        let handle = self.handle(id).await?;
        let mut trip = handle.lock().await;
        if !transition_allowed(trip.status, TripStatus::Active) {
            return Err(EngineError::IllegalTransition {
                from: trip.status,
                to: TripStatus::Active,
            });
        }
        {
            let mut active = self.active_by_vehicle.lock().await;
            if let Some(&other) = active.get(&trip.vehicle_id) {
                if other != id {
                    return Err(EngineError::VehicleBusy {
                        vehicle_id: trip.vehicle_id,
                        trip_id: other,
                    });
                }
            }
            active.insert(trip.vehicle_id, id);
        }
        trip.status = TripStatus::Active;
        trip.started_at = Some(at);
        info!(trip_id = id, vehicle_id = trip.vehicle_id, "Trip started");
        Ok(trip.clone())
    }

    pub async fn complete(&self, id: i64, at: DateTime<Utc>) -> Result<Trip, EngineError> {
        let handle = self.handle(id).await?;
        let mut trip = handle.lock().await;
        if !transition_allowed(trip.status, TripStatus::Completed) {
            return Err(EngineError::IllegalTransition {
                from: trip.status,
                to: TripStatus::Completed,
            });
        }
        trip.status = TripStatus::Completed;
        trip.ended_at = Some(at);
        self.release_vehicle(trip.vehicle_id, id).await;
        info!(trip_id = id, "Trip completed");
        Ok(trip.clone())
    }

    pub async fn cancel(
        &self,
        id: i64,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Trip, EngineError> {
        let handle = self.handle(id).await?;
        let mut trip = handle.lock().await;
        if !transition_allowed(trip.status, TripStatus::Cancelled) {
            return Err(EngineError::IllegalTransition {
                from: trip.status,
                to: TripStatus::Cancelled,
            });
        }
        trip.status = TripStatus::Cancelled;
        trip.ended_at = Some(at);
        trip.cancel_reason = Some(reason);
        self.release_vehicle(trip.vehicle_id, id).await;
        info!(trip_id = id, "Trip cancelled");
        Ok(trip.clone())
    }

    /// Administrative status override. Routed through the same transition
    /// table and side effects as the dedicated operations; there is no
    /// free-form status write.
    pub async fn update_status(
        &self,
        id: i64,
        to: TripStatus,
        at: DateTime<Utc>,
    ) -> Result<Trip, EngineError> {
        match to {
            TripStatus::Active => self.start(id, at).await,
            TripStatus::Completed => self.complete(id, at).await,
            TripStatus::Cancelled => self.cancel(id, "administrative override".to_string(), at).await,
            TripStatus::Scheduled => {
                let trip = self.get(id).await?;
                Err(EngineError::IllegalTransition {
                    from: trip.status,
                    to: TripStatus::Scheduled,
                })
            }
        }
    }

    async fn release_vehicle(&self, vehicle_id: i64, trip_id: i64) {
        let mut active = self.active_by_vehicle.lock().await;
        if active.get(&vehicle_id) == Some(&trip_id) {
            active.remove(&vehicle_id);
        }
    }

    async fn with_scheduled<F>(&self, id: i64, mutate: F) -> Result<Trip, EngineError>
    where
        F: FnOnce(&mut Trip),
    {
        let handle = self.handle(id).await?;
        let mut trip = handle.lock().await;
        if trip.status != TripStatus::Scheduled {
            return Err(EngineError::TripAlreadyStarted(id));
        }
        mutate(&mut trip);
        Ok(trip.clone())
    }

    pub async fn assign_driver(&self, id: i64, driver_id: i64) -> Result<Trip, EngineError> {
        self.with_scheduled(id, |t| t.driver_id = driver_id).await
    }

    pub async fn assign_vehicle(&self, id: i64, vehicle_id: i64) -> Result<Trip, EngineError> {
        self.with_scheduled(id, |t| t.vehicle_id = vehicle_id).await
    }

    pub async fn assign_route(&self, id: i64, route_id: i64) -> Result<Trip, EngineError> {
        self.with_scheduled(id, |t| {
            t.route_id = route_id;
            t.progress.clear();
        })
        .await
    }

    /// Attach students to a trip. Idempotent union: re-assigning an id is a
    /// no-op, assigning a new set extends the existing one.
    pub async fn assign_students(&self, id: i64, students: Vec<i64>) -> Result<Trip, EngineError> {
        let handle = self.handle(id).await?;
        let mut trip = handle.lock().await;
        if matches!(trip.status, TripStatus::Completed | TripStatus::Cancelled) {
            return Err(EngineError::InvalidState {
                trip_id: id,
                status: trip.status,
            });
        }
        trip.students.extend(students);
        Ok(trip.clone())
    }

    /// Apply one position sample to a trip. Reports for the same trip
    /// serialize on its mutex and must be in timestamp order; an older
    /// report than the stored position is dropped with a warning. The
    /// final stop's departure completes the trip.
    ///
    /// `stops` is the trip's route ordered by sequence, fetched by the
    /// caller before any lock is taken.
    pub async fn apply_position(
        &self,
        id: i64,
        stops: &[Stop],
        report: PositionReport,
        config: &GeofenceConfig,
    ) -> Result<(Trip, Vec<StopEvent>), EngineError> {
        if !geofence::valid_coordinates(report.lat, report.lon) {
            return Err(EngineError::Validation(format!(
                "malformed coordinates ({}, {})",
                report.lat, report.lon
            )));
        }
        let handle = self.handle(id).await?;
        let mut trip = handle.lock().await;
        if trip.status != TripStatus::Active {
            return Err(EngineError::InvalidState {
                trip_id: id,
                status: trip.status,
            });
        }
        if let Some(last) = &trip.last_position {
            if report.timestamp < last.timestamp {
                warn!(
                    trip_id = id,
                    report_ts = %report.timestamp,
                    last_ts = %last.timestamp,
                    "Dropping stale position report"
                );
                return Ok((trip.clone(), Vec::new()));
            }
        }

        let events = geofence::evaluate(
            stops,
            &trip.progress,
            trip.last_position.as_ref(),
            &report,
            config,
        );
        for event in &events {
            let state = match event.kind {
                StopEventKind::Arrived => StopState::Arrived,
                StopEventKind::Departed => StopState::Departed,
                StopEventKind::Skipped => StopState::Skipped,
            };
            trip.progress.insert(event.sequence, state);
        }
        trip.last_position = Some(report);

        if let Some(last_stop) = stops.last() {
            if trip.stop_state(last_stop.sequence) == StopState::Departed {
                trip.status = TripStatus::Completed;
                trip.ended_at = Some(report.timestamp);
                self.release_vehicle(trip.vehicle_id, id).await;
                info!(trip_id = id, "Trip completed on final stop departure");
            }
        }

        Ok((trip.clone(), events))
    }

    /// Distinct students assigned to ACTIVE trips on the given route.
    pub async fn active_students_on_route(&self, route_id: i64) -> u64 {
        let mut students: BTreeSet<i64> = BTreeSet::new();
        for trip in self.list().await {
            if trip.route_id == route_id && trip.status == TripStatus::Active {
                students.extend(trip.students.iter().copied());
            }
        }
        students.len() as u64
    }

    pub async fn completed_trips_on_route(&self, route_id: i64) -> u64 {
        self.list()
            .await
            .into_iter()
            .filter(|t| t.route_id == route_id && t.status == TripStatus::Completed)
            .count() as u64
    }
}

impl Default for TripRegistry {
    fn default() -> Self {
        Self::new()
    }
}
