//! Read-only route estimates. No state of its own; pure functions over the
//! stop list plus filtered counts served by the trip registry.

use chrono::Duration;

use super::geofence::haversine_m;
use super::types::Stop;

/// Great-circle distance of the route: the haversine sum over consecutive
/// stops. Zero for routes with fewer than two stops.
pub fn route_distance_m(stops: &[Stop]) -> f64 {
    stops
        .windows(2)
        .map(|pair| haversine_m(pair[0].lat, pair[0].lon, pair[1].lat, pair[1].lon))
        .sum()
}

/// Duration estimate: driving time at the configured average speed plus a
/// fixed dwell per stop. `average_speed_kmh` must be positive (validated at
/// config load).
pub fn estimate_route_duration(
    stops: &[Stop],
    average_speed_kmh: f64,
    stop_dwell_secs: u32,
) -> Duration {
    let distance_m = route_distance_m(stops);
    let speed_ms = average_speed_kmh / 3.6;
    let driving_secs = distance_m / speed_ms;
    let dwell_secs = stops.len() as i64 * stop_dwell_secs as i64;
    Duration::seconds(driving_secs.round() as i64 + dwell_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(sequence: i64, lat: f64, lon: f64) -> Stop {
        Stop {
            id: sequence + 1,
            route_id: 1,
            name: format!("stop {}", sequence),
            lat,
            lon,
            sequence,
        }
    }

    #[test]
    fn distance_sums_consecutive_legs() {
        let stops = vec![stop(0, 0.0, 0.0), stop(1, 0.0, 1.0), stop(2, 0.0, 2.0)];
        let d = route_distance_m(&stops);
        // Two one-degree legs along the equator.
        assert!((d - 2.0 * 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn distance_of_trivial_routes_is_zero() {
        assert_eq!(route_distance_m(&[]), 0.0);
        assert_eq!(route_distance_m(&[stop(0, 48.3, 10.9)]), 0.0);
    }

    #[test]
    fn duration_combines_driving_and_dwell() {
        // 36 km/h = 10 m/s makes the arithmetic exact.
        let stops = vec![stop(0, 0.0, 0.0), stop(1, 0.0, 1.0)];
        let distance = route_distance_m(&stops);
        let estimate = estimate_route_duration(&stops, 36.0, 45);
        let expected = (distance / 10.0).round() as i64 + 2 * 45;
        assert_eq!(estimate.num_seconds(), expected);
    }

    #[test]
    fn duration_of_empty_route_is_zero() {
        let estimate = estimate_route_duration(&[], 30.0, 45);
        assert_eq!(estimate.num_seconds(), 0);
    }
}
