use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Stop arrival detection tuning
    #[serde(default)]
    pub geofence: GeofenceSettings,
    /// Notification scheduler configuration
    #[serde(default)]
    pub notify: NotifySettings,
    /// External position feed polling
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Route distance/duration estimation
    #[serde(default)]
    pub route_stats: RouteStatsSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceSettings {
    /// Radius in meters within which a position counts as "at" a stop (default: 100)
    #[serde(default = "GeofenceSettings::default_arrival_radius_m")]
    pub arrival_radius_m: f64,
}

impl Default for GeofenceSettings {
    fn default() -> Self {
        Self {
            arrival_radius_m: Self::default_arrival_radius_m(),
        }
    }
}

impl GeofenceSettings {
    fn default_arrival_radius_m() -> f64 {
        100.0
    }
}

/// Configuration for the notification scheduler loop
#[derive(Debug, Clone, Deserialize)]
pub struct NotifySettings {
    /// Interval in seconds between notification poll cycles (default: 30).
    /// Bounds worst-case notification latency together with channel latency.
    #[serde(default = "NotifySettings::default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum number of records delivered per poll cycle (default: 50)
    #[serde(default = "NotifySettings::default_batch_size")]
    pub batch_size: u32,
    /// Age in seconds after which an unnotified PRESENT record becomes
    /// notify-eligible (default: 900). ABSENT/LATE records are always eligible.
    #[serde(default = "NotifySettings::default_cutoff_secs")]
    pub cutoff_secs: i64,
    /// Maximum concurrent channel deliveries within one cycle (default: 4)
    #[serde(default = "NotifySettings::default_concurrency")]
    pub concurrency: usize,
    /// Delivery channel: "none", "sms", "email" or "app" (default: "none")
    #[serde(default = "NotifySettings::default_channel")]
    pub channel: String,
    /// Gateway endpoint for the sms/email/app channels
    #[serde(default)]
    pub gateway_url: Option<String>,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            batch_size: Self::default_batch_size(),
            cutoff_secs: Self::default_cutoff_secs(),
            concurrency: Self::default_concurrency(),
            channel: Self::default_channel(),
            gateway_url: None,
        }
    }
}

impl NotifySettings {
    fn default_interval_secs() -> u64 {
        30
    }
    fn default_batch_size() -> u32 {
        50
    }
    fn default_cutoff_secs() -> i64 {
        900
    }
    fn default_concurrency() -> usize {
        4
    }
    fn default_channel() -> String {
        "none".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// Optional external position feed URL, polled on a fixed interval
    #[serde(default)]
    pub feed_url: Option<String>,
    /// Interval in seconds between feed polls (default: 5)
    #[serde(default = "TelemetrySettings::default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            feed_url: None,
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl TelemetrySettings {
    fn default_interval_secs() -> u64 {
        5
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteStatsSettings {
    /// Average vehicle speed used for duration estimates (default: 30 km/h)
    #[serde(default = "RouteStatsSettings::default_average_speed_kmh")]
    pub average_speed_kmh: f64,
    /// Fixed dwell time per stop in seconds (default: 45)
    #[serde(default = "RouteStatsSettings::default_stop_dwell_secs")]
    pub stop_dwell_secs: u32,
}

impl Default for RouteStatsSettings {
    fn default() -> Self {
        Self {
            average_speed_kmh: Self::default_average_speed_kmh(),
            stop_dwell_secs: Self::default_stop_dwell_secs(),
        }
    }
}

impl RouteStatsSettings {
    fn default_average_speed_kmh() -> f64 {
        30.0
    }
    fn default_stop_dwell_secs() -> u32 {
        45
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Panics on settings that cannot produce a working deployment.
    pub fn validate(&self) {
        assert!(
            self.geofence.arrival_radius_m > 0.0,
            "geofence.arrival_radius_m must be positive"
        );
        assert!(
            self.route_stats.average_speed_kmh > 0.0,
            "route_stats.average_speed_kmh must be positive"
        );
        assert!(self.notify.batch_size > 0, "notify.batch_size must be positive");
        assert!(
            self.notify.concurrency > 0,
            "notify.concurrency must be positive"
        );
        match self.notify.channel.as_str() {
            "none" => {}
            "sms" | "email" | "app" => {
                assert!(
                    self.notify.gateway_url.is_some(),
                    "notify.gateway_url is required for the '{}' channel",
                    self.notify.channel
                );
            }
            other => panic!("unknown notify.channel '{}' (expected none|sms|email|app)", other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config: Config = serde_yaml::from_str("cors_permissive: true").unwrap();
        assert_eq!(config.geofence.arrival_radius_m, 100.0);
        assert_eq!(config.notify.interval_secs, 30);
        assert_eq!(config.notify.batch_size, 50);
        assert_eq!(config.notify.channel, "none");
        assert_eq!(config.telemetry.interval_secs, 5);
        assert!(config.telemetry.feed_url.is_none());
        config.validate();
    }

    #[test]
    #[should_panic(expected = "gateway_url")]
    fn channel_without_gateway_rejected() {
        let config: Config = serde_yaml::from_str(
            "cors_permissive: true\nnotify:\n  channel: sms",
        )
        .unwrap();
        config.validate();
    }
}
