use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{from_engine, ApiError, AppState, ErrorResponse};
use crate::engine::routes::NewStop;
use crate::engine::stats;
use crate::engine::types::{RouteRecord, Stop};

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewStopRequest {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<NewStopRequest> for NewStop {
    fn from(request: NewStopRequest) -> Self {
        NewStop {
            name: request.name,
            lat: request.lat,
            lon: request.lon,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRouteRequest {
    pub name: String,
    pub school_id: Option<i64>,
    /// Initial stops in route order
    #[serde(default)]
    pub stops: Vec<NewStopRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddStopRequest {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Insert position; appends when omitted
    pub position: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReorderStopsRequest {
    /// Permutation of the route's stop ids in the new order
    pub stop_ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteResponse {
    pub data: RouteRecord,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteListResponse {
    pub data: Vec<RouteRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDetail {
    pub route: RouteRecord,
    pub stops: Vec<Stop>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDetailResponse {
    pub data: RouteDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopListResponse {
    pub data: Vec<Stop>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDistance {
    pub route_id: i64,
    /// Haversine sum over consecutive stops, in meters
    pub distance_m: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDistanceResponse {
    pub data: RouteDistance,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDuration {
    pub route_id: i64,
    pub distance_m: f64,
    pub duration_secs: i64,
    pub average_speed_kmh: f64,
    pub stop_dwell_secs: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDurationResponse {
    pub data: RouteDuration,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteCounters {
    pub route_id: i64,
    /// Distinct students on ACTIVE trips of this route
    pub active_students: u64,
    pub completed_trips: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteCountersResponse {
    pub data: RouteCounters,
}

/// Create a route with its initial stops
#[utoipa::path(
    post,
    path = "/v1/routes",
    request_body = CreateRouteRequest,
    responses(
        (status = 200, description = "The created route", body = RouteResponse),
        (status = 400, description = "Invalid route or stops", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn create_route(
    State(state): State<AppState>,
    Json(request): Json<CreateRouteRequest>,
) -> Result<Json<RouteResponse>, ApiError> {
    let stops = request.stops.into_iter().map(NewStop::from).collect();
    let route = state
        .engine
        .routes
        .create(request.name, request.school_id, stops)
        .await
        .map_err(from_engine)?;
    Ok(Json(RouteResponse { data: route }))
}

/// List all routes
#[utoipa::path(
    get,
    path = "/v1/routes",
    responses(
        (status = 200, description = "All routes", body = RouteListResponse)
    ),
    tag = "routes"
)]
pub async fn list_routes(
    State(state): State<AppState>,
) -> Result<Json<RouteListResponse>, ApiError> {
    let routes = state.engine.routes.list().await.map_err(from_engine)?;
    Ok(Json(RouteListResponse { data: routes }))
}

/// Get one route with its ordered stops
#[utoipa::path(
    get,
    path = "/v1/routes/{id}",
    params(("id" = i64, Path, description = "Route id")),
    responses(
        (status = 200, description = "The route and its stops", body = RouteDetailResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RouteDetailResponse>, ApiError> {
    let route = state.engine.routes.get(id).await.map_err(from_engine)?;
    let stops = state.engine.routes.stops(id).await.map_err(from_engine)?;
    Ok(Json(RouteDetailResponse {
        data: RouteDetail { route, stops },
    }))
}

/// Add a stop to a route
#[utoipa::path(
    post,
    path = "/v1/routes/{id}/stops",
    params(("id" = i64, Path, description = "Route id")),
    request_body = AddStopRequest,
    responses(
        (status = 200, description = "The route's stops after the insert", body = StopListResponse),
        (status = 400, description = "Invalid stop", body = ErrorResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn add_stop(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AddStopRequest>,
) -> Result<Json<StopListResponse>, ApiError> {
    let stop = NewStop {
        name: request.name,
        lat: request.lat,
        lon: request.lon,
    };
    let stops = state
        .engine
        .routes
        .add_stop(id, stop, request.position)
        .await
        .map_err(from_engine)?;
    Ok(Json(StopListResponse { data: stops }))
}

/// Remove a stop from a route
#[utoipa::path(
    delete,
    path = "/v1/routes/{id}/stops/{stop_id}",
    params(
        ("id" = i64, Path, description = "Route id"),
        ("stop_id" = i64, Path, description = "Stop id")
    ),
    responses(
        (status = 200, description = "The route's stops after the removal", body = StopListResponse),
        (status = 404, description = "Route or stop not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn remove_stop(
    State(state): State<AppState>,
    Path((id, stop_id)): Path<(i64, i64)>,
) -> Result<Json<StopListResponse>, ApiError> {
    let stops = state
        .engine
        .routes
        .remove_stop(id, stop_id)
        .await
        .map_err(from_engine)?;
    Ok(Json(StopListResponse { data: stops }))
}

/// Reorder a route's stops
#[utoipa::path(
    put,
    path = "/v1/routes/{id}/stops/reorder",
    params(("id" = i64, Path, description = "Route id")),
    request_body = ReorderStopsRequest,
    responses(
        (status = 200, description = "The route's stops in the new order", body = StopListResponse),
        (status = 400, description = "Not a permutation of the route's stops", body = ErrorResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn reorder_stops(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ReorderStopsRequest>,
) -> Result<Json<StopListResponse>, ApiError> {
    let stops = state
        .engine
        .routes
        .reorder_stops(id, request.stop_ids)
        .await
        .map_err(from_engine)?;
    Ok(Json(StopListResponse { data: stops }))
}

/// Great-circle distance of a route
#[utoipa::path(
    get,
    path = "/v1/routes/{id}/distance",
    params(("id" = i64, Path, description = "Route id")),
    responses(
        (status = 200, description = "Route distance", body = RouteDistanceResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn route_distance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RouteDistanceResponse>, ApiError> {
    let stops = state.engine.routes.stops(id).await.map_err(from_engine)?;
    Ok(Json(RouteDistanceResponse {
        data: RouteDistance {
            route_id: id,
            distance_m: stats::route_distance_m(&stops),
        },
    }))
}

/// Duration estimate from distance, average speed and per-stop dwell
#[utoipa::path(
    get,
    path = "/v1/routes/{id}/duration",
    params(("id" = i64, Path, description = "Route id")),
    responses(
        (status = 200, description = "Route duration estimate", body = RouteDurationResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn route_duration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RouteDurationResponse>, ApiError> {
    let stops = state.engine.routes.stops(id).await.map_err(from_engine)?;
    let settings = &state.route_stats;
    let duration = stats::estimate_route_duration(
        &stops,
        settings.average_speed_kmh,
        settings.stop_dwell_secs,
    );
    Ok(Json(RouteDurationResponse {
        data: RouteDuration {
            route_id: id,
            distance_m: stats::route_distance_m(&stops),
            duration_secs: duration.num_seconds(),
            average_speed_kmh: settings.average_speed_kmh,
            stop_dwell_secs: settings.stop_dwell_secs,
        },
    }))
}

/// Live counters for a route
#[utoipa::path(
    get,
    path = "/v1/routes/{id}/stats",
    params(("id" = i64, Path, description = "Route id")),
    responses(
        (status = 200, description = "Active students and completed trips", body = RouteCountersResponse),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn route_counters(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RouteCountersResponse>, ApiError> {
    state.engine.routes.get(id).await.map_err(from_engine)?;
    let active_students = state.engine.trips.active_students_on_route(id).await;
    let completed_trips = state.engine.trips.completed_trips_on_route(id).await;
    Ok(Json(RouteCountersResponse {
        data: RouteCounters {
            route_id: id,
            active_students,
            completed_trips,
        },
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_route).get(list_routes))
        .route("/{id}", get(get_route))
        .route("/{id}/stops", post(add_stop))
        .route("/{id}/stops/reorder", put(reorder_stops))
        .route("/{id}/stops/{stop_id}", delete(remove_stop))
        .route("/{id}/distance", get(route_distance))
        .route("/{id}/duration", get(route_duration))
        .route("/{id}/stats", get(route_counters))
        .with_state(state)
}
