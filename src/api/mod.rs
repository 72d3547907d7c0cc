pub mod attendance;
pub mod error;
pub mod health;
pub mod routes;
pub mod trips;

pub use error::{bad_request, from_engine, internal_error, ApiError, ErrorResponse};

use std::sync::Arc;

use axum::Router;

use crate::config::RouteStatsSettings;
use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub route_stats: RouteStatsSettings,
}

pub fn router(engine: Arc<Engine>, route_stats: RouteStatsSettings) -> Router {
    let state = AppState {
        engine,
        route_stats,
    };
    Router::new()
        .nest("/trips", trips::router(state.clone()))
        .nest("/attendance", attendance::router(state.clone()))
        .nest("/routes", routes::router(state.clone()))
        .nest("/health", health::router(state))
}
