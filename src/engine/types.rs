//! Domain types shared across the engine, the API layer and the notifier.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Lifecycle state of a trip. Transitions are validated by
/// `lifecycle::transition_allowed`; nothing else writes this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "SCHEDULED",
            TripStatus::Active => "ACTIVE",
            TripStatus::Completed => "COMPLETED",
            TripStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Some(TripStatus::Scheduled),
            "ACTIVE" => Some(TripStatus::Active),
            "COMPLETED" => Some(TripStatus::Completed),
            "CANCELLED" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence status of a student on one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Excused => "EXCUSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "LATE" => Some(AttendanceStatus::Late),
            "EXCUSED" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel through which a guardian was notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum NotifyMethod {
    Sms,
    Email,
    App,
    None,
}

impl NotifyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyMethod::Sms => "SMS",
            NotifyMethod::Email => "EMAIL",
            NotifyMethod::App => "APP",
            NotifyMethod::None => "NONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SMS" => Some(NotifyMethod::Sms),
            "EMAIL" => Some(NotifyMethod::Email),
            "APP" => Some(NotifyMethod::App),
            "NONE" => Some(NotifyMethod::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotifyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route as stored, without its stops.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct RouteRecord {
    pub id: i64,
    pub name: String,
    /// School this route belongs to, if any
    pub school_id: Option<i64>,
}

/// A fixed geographic point on a route where students board or alight.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Stop {
    pub id: i64,
    pub route_id: i64,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Position on the route; contiguous 0..n-1 per route
    pub sequence: i64,
}

/// One vehicle position sample. Ephemeral: only the latest sample survives
/// on the trip it belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct PositionReport {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-stop progress of a trip. Monotonic: pending -> arrived -> departed,
/// or pending -> skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopState {
    Pending,
    Arrived,
    Departed,
    Skipped,
}

/// Kind of stop event produced by geofence evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StopEventKind {
    Arrived,
    Departed,
    Skipped,
}

/// Arrival/departure/skip event for one stop of one trip
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StopEvent {
    pub stop_id: i64,
    pub sequence: i64,
    pub kind: StopEventKind,
    pub at: DateTime<Utc>,
}

/// One scheduled or in-progress traversal of a route by a vehicle/driver.
/// Owned exclusively by the trip registry; everything else sees snapshots.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Trip {
    pub id: i64,
    pub route_id: i64,
    pub vehicle_id: i64,
    pub driver_id: i64,
    pub status: TripStatus,
    pub scheduled_departure: DateTime<Utc>,
    pub scheduled_arrival: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Students assigned to this trip, ordered by id
    pub students: BTreeSet<i64>,
    pub last_position: Option<PositionReport>,
    /// Stop sequence index -> progress state. Absent means pending.
    pub progress: BTreeMap<i64, StopState>,
    pub cancel_reason: Option<String>,
}

impl Trip {
    pub fn stop_state(&self, sequence: i64) -> StopState {
        self.progress
            .get(&sequence)
            .copied()
            .unwrap_or(StopState::Pending)
    }
}

/// The record of a student's presence status for one trip. Created on first
/// scan, corrected in place, never deleted.
#[derive(Debug, Clone, Serialize, ToSchema, FromRow)]
pub struct Attendance {
    pub id: i64,
    pub student_id: i64,
    pub trip_id: i64,
    pub school_id: i64,
    pub status: AttendanceStatus,
    pub scan_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub qr_code: Option<String>,
    pub notified: bool,
    pub notify_method: NotifyMethod,
}

/// Aggregated attendance counts over a queried time window
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AttendanceStats {
    pub total: u64,
    pub present: u64,
    pub absent: u64,
    pub late: u64,
    pub excused: u64,
    /// present / total * 100; 0 when total is 0
    pub percentage: f64,
}

impl AttendanceStats {
    pub fn from_statuses<I: IntoIterator<Item = AttendanceStatus>>(statuses: I) -> Self {
        let mut stats = AttendanceStats {
            total: 0,
            present: 0,
            absent: 0,
            late: 0,
            excused: 0,
            percentage: 0.0,
        };
        for status in statuses {
            stats.total += 1;
            match status {
                AttendanceStatus::Present => stats.present += 1,
                AttendanceStatus::Absent => stats.absent += 1,
                AttendanceStatus::Late => stats.late += 1,
                AttendanceStatus::Excused => stats.excused += 1,
            }
        }
        if stats.total > 0 {
            stats.percentage = stats.present as f64 / stats.total as f64 * 100.0;
        }
        stats
    }
}
