//! Stop arrival detection.
//!
//! Turns a pair of position samples into arrival/departure/skip events for
//! the stops of a route. Pure function over its inputs; the trip registry
//! owns the progress state and applies the produced events.

use std::collections::BTreeMap;

use crate::engine::types::{PositionReport, Stop, StopEvent, StopEventKind, StopState};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy)]
pub struct GeofenceConfig {
    /// Radius in meters within which a position counts as "at" a stop
    pub arrival_radius_m: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: 100.0,
        }
    }
}

pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Distance in meters from a point to the segment a->b, using a local
/// planar approximation centred on the point. Good enough for the
/// corridor test; not for long geodesics.
pub fn point_to_segment_m(
    lat: f64,
    lon: f64,
    a_lat: f64,
    a_lon: f64,
    b_lat: f64,
    b_lon: f64,
) -> f64 {
    let lat0 = lat.to_radians();
    let project = |p_lat: f64, p_lon: f64| -> (f64, f64) {
        (
            (p_lon - lon).to_radians() * lat0.cos() * EARTH_RADIUS_M,
            (p_lat - lat).to_radians() * EARTH_RADIUS_M,
        )
    };
    let (ax, ay) = project(a_lat, a_lon);
    let (bx, by) = project(b_lat, b_lon);

    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return (ax * ax + ay * ay).sqrt();
    }
    // The point sits at the local origin; clamp the projection onto a->b.
    let t = ((-ax * dx - ay * dy) / len2).clamp(0.0, 1.0);
    let (px, py) = (ax + t * dx, ay + t * dy);
    (px * px + py * py).sqrt()
}

pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Evaluate one position sample against the route's stops.
///
/// `stops` must be ordered by sequence. `progress` maps sequence index to
/// stop state; absent entries are pending. Produces at most one arrival
/// and one departure/skip per stop per trip:
///
/// - arrival fires for the earliest pending stop within the radius;
/// - departure fires when the arrived stop's radius is exited, or
///   implicitly when a later stop is arrived at;
/// - pending stops between the current frontier and a detected arrival
///   are skipped when the travel segment passes within the radius of
///   each of them. With no previous sample the skip is granted without
///   corridor evidence; with one, a stop outside the corridor marks the
///   report as a positional outlier and the arrival is suppressed.
pub fn evaluate(
    stops: &[Stop],
    progress: &BTreeMap<i64, StopState>,
    previous: Option<&PositionReport>,
    report: &PositionReport,
    config: &GeofenceConfig,
) -> Vec<StopEvent> {
    let radius = config.arrival_radius_m;
    let state = |stop: &Stop| {
        progress
            .get(&stop.sequence)
            .copied()
            .unwrap_or(StopState::Pending)
    };

    // At most one stop is in the arrived-not-departed state at a time.
    let current = stops.iter().find(|s| state(s) == StopState::Arrived);

    // Earliest pending stop within the radius, and the pending stops
    // scanned before it (skip candidates).
    let mut skip_candidates: Vec<&Stop> = Vec::new();
    let mut target: Option<&Stop> = None;
    for stop in stops.iter().filter(|s| state(s) == StopState::Pending) {
        if haversine_m(report.lat, report.lon, stop.lat, stop.lon) <= radius {
            target = Some(stop);
            break;
        }
        skip_candidates.push(stop);
    }

    if let Some(target_stop) = target {
        if !skip_candidates.is_empty() {
            if let Some(prev) = previous {
                let corridor_ok = skip_candidates.iter().all(|s| {
                    point_to_segment_m(s.lat, s.lon, prev.lat, prev.lon, report.lat, report.lon)
                        <= radius
                });
                if !corridor_ok {
                    // Positional outlier: the jump crosses stops the vehicle
                    // never passed. Keep the frontier; a later sample decides.
                    target = None;
                }
            }
        }
        if target.is_some() {
            let mut events = Vec::new();
            if let Some(cur) = current {
                events.push(StopEvent {
                    stop_id: cur.id,
                    sequence: cur.sequence,
                    kind: StopEventKind::Departed,
                    at: report.timestamp,
                });
            }
            for skipped in &skip_candidates {
                events.push(StopEvent {
                    stop_id: skipped.id,
                    sequence: skipped.sequence,
                    kind: StopEventKind::Skipped,
                    at: report.timestamp,
                });
            }
            events.push(StopEvent {
                stop_id: target_stop.id,
                sequence: target_stop.sequence,
                kind: StopEventKind::Arrived,
                at: report.timestamp,
            });
            return events;
        }
    }

    // No new arrival: the only possible event is an exit departure.
    if let Some(cur) = current {
        if haversine_m(report.lat, report.lon, cur.lat, cur.lon) > radius {
            return vec![StopEvent {
                stop_id: cur.id,
                sequence: cur.sequence,
                kind: StopEventKind::Departed,
                at: report.timestamp,
            }];
        }
    }

    Vec::new()
}
