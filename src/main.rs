pub mod api;
mod config;
mod engine;
mod notify;
mod telemetry;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::Config;
use engine::geofence::GeofenceConfig;
use engine::Engine;
use notify::NotifyManager;
use telemetry::TelemetryManager;

#[derive(OpenApi)]
#[openapi(
    info(title = "SchoolRun API", version = "0.1.0"),
    paths(
        api::trips::create_trip,
        api::trips::list_trips,
        api::trips::get_trip,
        api::trips::start_trip,
        api::trips::complete_trip,
        api::trips::cancel_trip,
        api::trips::update_trip_status,
        api::trips::assign_driver,
        api::trips::assign_vehicle,
        api::trips::assign_route,
        api::trips::assign_students,
        api::trips::report_position,
        api::attendance::record_attendance,
        api::attendance::get_attendance,
        api::attendance::update_attendance_status,
        api::attendance::bulk_update_attendance,
        api::attendance::mark_attendance_notified,
        api::attendance::unnotified_attendance,
        api::attendance::student_stats,
        api::attendance::school_stats,
        api::attendance::school_report,
        api::routes::create_route,
        api::routes::list_routes,
        api::routes::get_route,
        api::routes::add_stop,
        api::routes::remove_stop,
        api::routes::reorder_stops,
        api::routes::route_distance,
        api::routes::route_duration,
        api::routes::route_counters,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::trips::CreateTripRequest,
        api::trips::CancelTripRequest,
        api::trips::AssignStudentsRequest,
        api::trips::ReportPositionRequest,
        api::trips::TripResponse,
        api::trips::TripListResponse,
        api::trips::StopEventListResponse,
        api::attendance::RecordAttendanceRequest,
        api::attendance::AttendanceResponse,
        api::attendance::AttendanceListResponse,
        api::attendance::AttendanceStatsResponse,
        api::attendance::BulkUpdateResponse,
        api::routes::NewStopRequest,
        api::routes::CreateRouteRequest,
        api::routes::AddStopRequest,
        api::routes::ReorderStopsRequest,
        api::routes::RouteResponse,
        api::routes::RouteListResponse,
        api::routes::RouteDetail,
        api::routes::RouteDetailResponse,
        api::routes::StopListResponse,
        api::routes::RouteDistance,
        api::routes::RouteDistanceResponse,
        api::routes::RouteDuration,
        api::routes::RouteDurationResponse,
        api::routes::RouteCounters,
        api::routes::RouteCountersResponse,
        api::health::HealthResponse,
        engine::types::Trip,
        engine::types::TripStatus,
        engine::types::Stop,
        engine::types::RouteRecord,
        engine::types::PositionReport,
        engine::types::StopState,
        engine::types::StopEventKind,
        engine::types::StopEvent,
        engine::types::Attendance,
        engine::types::AttendanceStatus,
        engine::types::AttendanceStats,
        engine::types::NotifyMethod,
        engine::attendance::BulkUpdateItem,
        engine::attendance::BulkUpdateOutcome,
    )),
    tags(
        (name = "trips", description = "Trip lifecycle and position ingestion"),
        (name = "attendance", description = "Attendance recording, corrections and statistics"),
        (name = "routes", description = "Route and stop administration"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    config.validate();
    tracing::info!(
        geofence_radius_m = config.geofence.arrival_radius_m,
        notify_channel = %config.notify.channel,
        "Loaded configuration"
    );

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Initialize SQLite database
    let db_path = std::path::Path::new("database");
    if let Err(e) = std::fs::create_dir_all(db_path) {
        tracing::warn!("Could not create database directory: {}", e);
    }
    let db_url = format!("sqlite:{}?mode=rwc", db_path.join("data.db").display());
    let pool = SqlitePool::connect(&db_url)
        .await
        .expect("Failed to connect to SQLite database");

    // Run migrations
    let migrator = sqlx::migrate!("./migrations");
    tracing::info!(migrations = migrator.migrations.len(), "Found migrations");
    migrator.run(&pool).await.expect("Failed to run migrations");
    tracing::info!("Database migrations completed");

    // Build the engine
    let engine = Arc::new(Engine::new(
        pool.clone(),
        GeofenceConfig {
            arrival_radius_m: config.geofence.arrival_radius_m,
        },
    ));

    // Start the notification scheduler in background
    let channel =
        notify::build_channel(&config.notify).expect("Failed to build notification channel");
    let notify_manager = Arc::new(NotifyManager::new(
        engine.attendance.clone(),
        channel,
        &config.notify,
    ));
    tokio::spawn(async move {
        notify_manager.start().await;
    });

    // Start the telemetry poll loop if a feed is configured
    if let Some(feed_url) = config.telemetry.feed_url.clone() {
        let telemetry_manager = Arc::new(
            TelemetryManager::new(engine.clone(), feed_url, config.telemetry.interval_secs)
                .expect("Failed to initialize telemetry manager"),
        );
        tokio::spawn(async move {
            telemetry_manager.start().await;
        });
    }

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest("/v1", api::router(engine, config.route_stats.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("Failed to bind to port 3000");

    tracing::info!("Server running on http://localhost:3000");
    tracing::info!("Swagger UI: http://localhost:3000/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "SchoolRun API"
}
