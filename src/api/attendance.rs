use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{bad_request, from_engine, ApiError, AppState, ErrorResponse};
use crate::engine::attendance::{BulkUpdateItem, BulkUpdateOutcome, RecordAttendance};
use crate::engine::types::{Attendance, AttendanceStats, AttendanceStatus, NotifyMethod};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordAttendanceRequest {
    pub student_id: i64,
    pub trip_id: i64,
    pub school_id: i64,
    /// PRESENT | ABSENT | LATE | EXCUSED
    pub status: String,
    /// Defaults to the server clock when omitted
    pub scan_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub qr_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusQuery {
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkNotifiedQuery {
    pub method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnnotifiedQuery {
    #[serde(rename = "cutoffTime")]
    pub cutoff_time: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceResponse {
    pub data: Attendance,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceListResponse {
    pub data: Vec<Attendance>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceStatsResponse {
    pub data: AttendanceStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkUpdateResponse {
    pub data: Vec<BulkUpdateOutcome>,
}

/// Widen a `start`..`end` date pair (YYYY-MM-DD) to an inclusive UTC
/// datetime range: T00:00:00 on the first day to T23:59:59 on the last.
fn day_range(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| bad_request(format!("invalid date '{}', expected YYYY-MM-DD", s)))
    };
    let start_day = parse(start)?;
    let end_day = parse(end)?;
    if end_day < start_day {
        return Err(bad_request("end date precedes start date"));
    }
    let from = start_day.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let to = end_day.and_hms_opt(23, 59, 59).unwrap().and_utc();
    Ok((from, to))
}

/// Record attendance for a student on a trip. Creates on first scan,
/// corrects afterwards; an earlier scan never overwrites a later one.
#[utoipa::path(
    post,
    path = "/v1/attendance/record",
    request_body = RecordAttendanceRequest,
    responses(
        (status = 200, description = "The stored record", body = AttendanceResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn record_attendance(
    State(state): State<AppState>,
    Json(request): Json<RecordAttendanceRequest>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let status = AttendanceStatus::parse(&request.status)
        .ok_or_else(|| bad_request(format!("unknown attendance status '{}'", request.status)))?;
    state
        .engine
        .trips
        .get(request.trip_id)
        .await
        .map_err(from_engine)?;
    let record = state
        .engine
        .attendance
        .record(RecordAttendance {
            student_id: request.student_id,
            trip_id: request.trip_id,
            school_id: request.school_id,
            status,
            scan_time: request.scan_time.unwrap_or_else(Utc::now),
            notes: request.notes,
            qr_code: request.qr_code,
        })
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceResponse { data: record }))
}

/// Get one attendance record
#[utoipa::path(
    get,
    path = "/v1/attendance/{id}",
    params(("id" = i64, Path, description = "Attendance id")),
    responses(
        (status = 200, description = "The record", body = AttendanceResponse),
        (status = 404, description = "Record not found", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn get_attendance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let record = state.engine.attendance.get(id).await.map_err(from_engine)?;
    Ok(Json(AttendanceResponse { data: record }))
}

/// Correct the status of an existing record
#[utoipa::path(
    put,
    path = "/v1/attendance/{id}/status",
    params(
        ("id" = i64, Path, description = "Attendance id"),
        ("status" = String, Query, description = "New status (PRESENT|ABSENT|LATE|EXCUSED)"),
        ("notes" = Option<String>, Query, description = "Optional correction notes")
    ),
    responses(
        (status = 200, description = "The corrected record", body = AttendanceResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 404, description = "Record not found", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn update_attendance_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<UpdateStatusQuery>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let status = AttendanceStatus::parse(&query.status)
        .ok_or_else(|| bad_request(format!("unknown attendance status '{}'", query.status)))?;
    let record = state
        .engine
        .attendance
        .update_status(id, status, query.notes)
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceResponse { data: record }))
}

/// Apply a batch of corrections; each item succeeds or fails on its own
#[utoipa::path(
    put,
    path = "/v1/attendance/bulk-update",
    request_body = Vec<BulkUpdateItem>,
    responses(
        (status = 200, description = "Per-item outcomes", body = BulkUpdateResponse)
    ),
    tag = "attendance"
)]
pub async fn bulk_update_attendance(
    State(state): State<AppState>,
    Json(items): Json<Vec<BulkUpdateItem>>,
) -> Json<BulkUpdateResponse> {
    let outcomes = state.engine.attendance.bulk_update(items).await;
    Json(BulkUpdateResponse { data: outcomes })
}

/// Mark a record as notified through the given method
#[utoipa::path(
    put,
    path = "/v1/attendance/{id}/mark-notified",
    params(
        ("id" = i64, Path, description = "Attendance id"),
        ("method" = Option<String>, Query, description = "SMS|EMAIL|APP (defaults to APP)")
    ),
    responses(
        (status = 200, description = "The updated record", body = AttendanceResponse),
        (status = 400, description = "Unknown method", body = ErrorResponse),
        (status = 404, description = "Record not found", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn mark_attendance_notified(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<MarkNotifiedQuery>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let method = match &query.method {
        None => NotifyMethod::App,
        Some(raw) => NotifyMethod::parse(raw)
            .ok_or_else(|| bad_request(format!("unknown notification method '{}'", raw)))?,
    };
    let record = state
        .engine
        .attendance
        .mark_notified(id, method)
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceResponse { data: record }))
}

/// Records still awaiting notification
#[utoipa::path(
    get,
    path = "/v1/attendance/unnotified",
    params(
        ("cutoffTime" = String, Query, description = "ISO-8601 cutoff; older PRESENT records are eligible"),
        ("limit" = Option<u32>, Query, description = "Maximum rows (default 500)")
    ),
    responses(
        (status = 200, description = "Eligible records, oldest scan first", body = AttendanceListResponse),
        (status = 400, description = "Malformed cutoff", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn unnotified_attendance(
    State(state): State<AppState>,
    Query(query): Query<UnnotifiedQuery>,
) -> Result<Json<AttendanceListResponse>, ApiError> {
    let cutoff = DateTime::parse_from_rfc3339(&query.cutoff_time)
        .map_err(|_| {
            bad_request(format!(
                "invalid cutoffTime '{}', expected an ISO-8601 datetime",
                query.cutoff_time
            ))
        })?
        .with_timezone(&Utc);
    let records = state
        .engine
        .attendance
        .find_unnotified(cutoff, query.limit.unwrap_or(500))
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceListResponse { data: records }))
}

/// Attendance aggregates for one student over an inclusive day range
#[utoipa::path(
    get,
    path = "/v1/attendance/student/{id}/stats",
    params(
        ("id" = i64, Path, description = "Student id"),
        ("start" = String, Query, description = "First day (YYYY-MM-DD)"),
        ("end" = String, Query, description = "Last day (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "Aggregated counts and percentage", body = AttendanceStatsResponse),
        (status = 400, description = "Malformed dates", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn student_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<AttendanceStatsResponse>, ApiError> {
    let (start, end) = day_range(&query.start, &query.end)?;
    let stats = state
        .engine
        .attendance
        .student_stats(id, start, end)
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceStatsResponse { data: stats }))
}

/// Attendance aggregates for one school over an inclusive day range
#[utoipa::path(
    get,
    path = "/v1/attendance/school/{id}/stats",
    params(
        ("id" = i64, Path, description = "School id"),
        ("start" = String, Query, description = "First day (YYYY-MM-DD)"),
        ("end" = String, Query, description = "Last day (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "Aggregated counts and percentage", body = AttendanceStatsResponse),
        (status = 400, description = "Malformed dates", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn school_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<AttendanceStatsResponse>, ApiError> {
    let (start, end) = day_range(&query.start, &query.end)?;
    let stats = state
        .engine
        .attendance
        .school_stats(id, start, end)
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceStatsResponse { data: stats }))
}

/// Raw attendance rows for a school over an inclusive day range
#[utoipa::path(
    get,
    path = "/v1/attendance/school/{id}/report",
    params(
        ("id" = i64, Path, description = "School id"),
        ("start" = String, Query, description = "First day (YYYY-MM-DD)"),
        ("end" = String, Query, description = "Last day (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "Records ordered by scan time", body = AttendanceListResponse),
        (status = 400, description = "Malformed dates", body = ErrorResponse)
    ),
    tag = "attendance"
)]
pub async fn school_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<AttendanceListResponse>, ApiError> {
    let (start, end) = day_range(&query.start, &query.end)?;
    let records = state
        .engine
        .attendance
        .school_report(id, start, end)
        .await
        .map_err(from_engine)?;
    Ok(Json(AttendanceListResponse { data: records }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/record", post(record_attendance))
        .route("/bulk-update", put(bulk_update_attendance))
        .route("/unnotified", get(unnotified_attendance))
        .route("/{id}", get(get_attendance))
        .route("/{id}/status", put(update_attendance_status))
        .route("/{id}/mark-notified", put(mark_attendance_notified))
        .route("/student/{id}/stats", get(student_stats))
        .route("/school/{id}/stats", get(school_stats))
        .route("/school/{id}/report", get(school_report))
        .with_state(state)
}
