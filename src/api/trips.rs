use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{bad_request, from_engine, ApiError, AppState, ErrorResponse};
use crate::engine::lifecycle::NewTrip;
use crate::engine::types::{PositionReport, StopEvent, Trip, TripStatus};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTripRequest {
    pub route_id: i64,
    pub vehicle_id: i64,
    pub driver_id: i64,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelTripRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignStudentsRequest {
    pub student_ids: Vec<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTripStatusQuery {
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReportPositionRequest {
    pub lat: f64,
    pub lon: f64,
    /// Sample time; defaults to the server clock when omitted
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripResponse {
    pub data: Trip,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripListResponse {
    pub data: Vec<Trip>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopEventListResponse {
    pub data: Vec<StopEvent>,
}

/// Schedule a new trip on a route
#[utoipa::path(
    post,
    path = "/v1/trips",
    request_body = CreateTripRequest,
    responses(
        (status = 200, description = "The scheduled trip", body = TripResponse),
        (status = 400, description = "Invalid schedule", body = ErrorResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn create_trip(
    State(state): State<AppState>,
    Json(request): Json<CreateTripRequest>,
) -> Result<Json<TripResponse>, ApiError> {
    if request.scheduled_arrival < request.scheduled_departure {
        return Err(bad_request(
            "scheduled_arrival must not precede scheduled_departure",
        ));
    }
    state
        .engine
        .routes
        .get(request.route_id)
        .await
        .map_err(from_engine)?;
    let trip = state
        .engine
        .trips
        .create(NewTrip {
            route_id: request.route_id,
            vehicle_id: request.vehicle_id,
            driver_id: request.driver_id,
            scheduled_departure: request.scheduled_departure,
            scheduled_arrival: request.scheduled_arrival,
        })
        .await;
    Ok(Json(TripResponse { data: trip }))
}

/// List all trips
#[utoipa::path(
    get,
    path = "/v1/trips",
    responses(
        (status = 200, description = "All trips, oldest first", body = TripListResponse)
    ),
    tag = "trips"
)]
pub async fn list_trips(State(state): State<AppState>) -> Json<TripListResponse> {
    Json(TripListResponse {
        data: state.engine.trips.list().await,
    })
}

/// Get one trip
#[utoipa::path(
    get,
    path = "/v1/trips/{id}",
    params(("id" = i64, Path, description = "Trip id")),
    responses(
        (status = 200, description = "The trip", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state.engine.trips.get(id).await.map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Start a scheduled trip
#[utoipa::path(
    post,
    path = "/v1/trips/{id}/start",
    params(("id" = i64, Path, description = "Trip id")),
    responses(
        (status = 200, description = "The started trip", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 409, description = "Illegal transition or vehicle busy", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn start_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state
        .engine
        .trips
        .start(id, Utc::now())
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Complete an active trip
#[utoipa::path(
    post,
    path = "/v1/trips/{id}/complete",
    params(("id" = i64, Path, description = "Trip id")),
    responses(
        (status = 200, description = "The completed trip", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 409, description = "Illegal transition", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn complete_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state
        .engine
        .trips
        .complete(id, Utc::now())
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Cancel a trip with a reason
#[utoipa::path(
    post,
    path = "/v1/trips/{id}/cancel",
    params(("id" = i64, Path, description = "Trip id")),
    request_body = CancelTripRequest,
    responses(
        (status = 200, description = "The cancelled trip", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 409, description = "Illegal transition", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn cancel_trip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CancelTripRequest>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state
        .engine
        .trips
        .cancel(id, request.reason, Utc::now())
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Administrative status override, validated against the transition table
#[utoipa::path(
    put,
    path = "/v1/trips/{id}/status",
    params(
        ("id" = i64, Path, description = "Trip id"),
        ("status" = String, Query, description = "Target status (SCHEDULED|ACTIVE|COMPLETED|CANCELLED)")
    ),
    responses(
        (status = 200, description = "The updated trip", body = TripResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 409, description = "Illegal transition", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn update_trip_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<UpdateTripStatusQuery>,
) -> Result<Json<TripResponse>, ApiError> {
    let status = TripStatus::parse(&query.status)
        .ok_or_else(|| bad_request(format!("unknown trip status '{}'", query.status)))?;
    let trip = state
        .engine
        .trips
        .update_status(id, status, Utc::now())
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Assign a driver; only while the trip is still scheduled
#[utoipa::path(
    put,
    path = "/v1/trips/{id}/driver/{driver_id}",
    params(
        ("id" = i64, Path, description = "Trip id"),
        ("driver_id" = i64, Path, description = "Driver id")
    ),
    responses(
        (status = 200, description = "The updated trip", body = TripResponse),
        (status = 409, description = "Trip already started", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn assign_driver(
    State(state): State<AppState>,
    Path((id, driver_id)): Path<(i64, i64)>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state
        .engine
        .trips
        .assign_driver(id, driver_id)
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Assign a vehicle; only while the trip is still scheduled
#[utoipa::path(
    put,
    path = "/v1/trips/{id}/vehicle/{vehicle_id}",
    params(
        ("id" = i64, Path, description = "Trip id"),
        ("vehicle_id" = i64, Path, description = "Vehicle id")
    ),
    responses(
        (status = 200, description = "The updated trip", body = TripResponse),
        (status = 409, description = "Trip already started", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn assign_vehicle(
    State(state): State<AppState>,
    Path((id, vehicle_id)): Path<(i64, i64)>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state
        .engine
        .trips
        .assign_vehicle(id, vehicle_id)
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Assign a route; only while the trip is still scheduled
#[utoipa::path(
    put,
    path = "/v1/trips/{id}/route/{route_id}",
    params(
        ("id" = i64, Path, description = "Trip id"),
        ("route_id" = i64, Path, description = "Route id")
    ),
    responses(
        (status = 200, description = "The updated trip", body = TripResponse),
        (status = 404, description = "Route not found", body = ErrorResponse),
        (status = 409, description = "Trip already started", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn assign_route(
    State(state): State<AppState>,
    Path((id, route_id)): Path<(i64, i64)>,
) -> Result<Json<TripResponse>, ApiError> {
    state.engine.routes.get(route_id).await.map_err(from_engine)?;
    let trip = state
        .engine
        .trips
        .assign_route(id, route_id)
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Attach students to a trip (idempotent union)
#[utoipa::path(
    put,
    path = "/v1/trips/{id}/students",
    params(("id" = i64, Path, description = "Trip id")),
    request_body = AssignStudentsRequest,
    responses(
        (status = 200, description = "The updated trip", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn assign_students(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AssignStudentsRequest>,
) -> Result<Json<TripResponse>, ApiError> {
    let trip = state
        .engine
        .trips
        .assign_students(id, request.student_ids)
        .await
        .map_err(from_engine)?;
    Ok(Json(TripResponse { data: trip }))
}

/// Ingest a position report for an active trip
#[utoipa::path(
    post,
    path = "/v1/trips/{id}/position",
    params(("id" = i64, Path, description = "Trip id")),
    request_body = ReportPositionRequest,
    responses(
        (status = 200, description = "Stop events produced by this sample", body = StopEventListResponse),
        (status = 400, description = "Malformed coordinates", body = ErrorResponse),
        (status = 409, description = "Trip is not active", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn report_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ReportPositionRequest>,
) -> Result<Json<StopEventListResponse>, ApiError> {
    let report = PositionReport {
        lat: request.lat,
        lon: request.lon,
        timestamp: request.timestamp.unwrap_or_else(Utc::now),
    };
    let (_, events) = state
        .engine
        .ingest_position(id, report)
        .await
        .map_err(from_engine)?;
    Ok(Json(StopEventListResponse { data: events }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_trip).get(list_trips))
        .route("/{id}", get(get_trip))
        .route("/{id}/start", post(start_trip))
        .route("/{id}/complete", post(complete_trip))
        .route("/{id}/cancel", post(cancel_trip))
        .route("/{id}/status", put(update_trip_status))
        .route("/{id}/driver/{driver_id}", put(assign_driver))
        .route("/{id}/vehicle/{vehicle_id}", put(assign_vehicle))
        .route("/{id}/route/{route_id}", put(assign_route))
        .route("/{id}/students", put(assign_students))
        .route("/{id}/position", post(report_position))
        .with_state(state)
}
