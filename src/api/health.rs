use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::engine::types::TripStatus;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Number of configured routes
    pub route_count: usize,
    /// Trips known to the registry, all states
    pub trip_count: usize,
    /// Trips currently ACTIVE
    pub active_trip_count: usize,
    /// Attendance records stored
    pub attendance_count: u64,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let routes = state.engine.routes.list().await.unwrap_or_default();
    let trips = state.engine.trips.list().await;
    let active = trips
        .iter()
        .filter(|t| t.status == TripStatus::Active)
        .count();
    let attendance_count = state.engine.attendance.count().await.unwrap_or(0);

    Json(HealthResponse {
        healthy: true,
        route_count: routes.len(),
        trip_count: trips.len(),
        active_trip_count: active,
        attendance_count,
    })
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(health_check)).with_state(state)
}
