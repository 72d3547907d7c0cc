//! External position feed polling.
//!
//! The push-to-poll adapter: an explicit timer task that fetches the
//! configured telemetry feed on a fixed interval and funnels each sample
//! into the engine. Bad samples are logged and dropped, never fatal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::engine::types::PositionReport;
use crate::engine::{Engine, EngineError};

/// One sample as published by the telemetry feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedReport {
    pub trip_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct TelemetryManager {
    engine: Arc<Engine>,
    client: reqwest::Client,
    feed_url: String,
    interval_secs: u64,
}

impl TelemetryManager {
    pub fn new(
        engine: Arc<Engine>,
        feed_url: String,
        interval_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            engine,
            client,
            feed_url,
            interval_secs,
        })
    }

    pub async fn start(self: Arc<Self>) {
        info!(
            feed_url = %self.feed_url,
            interval_secs = self.interval_secs,
            "Starting telemetry poll loop"
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "Telemetry feed poll failed");
            }
        }
    }

    async fn poll_once(&self) -> Result<(), reqwest::Error> {
        let reports: Vec<FeedReport> = self
            .client
            .get(&self.feed_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !reports.is_empty() {
            self.apply(reports).await;
        }
        Ok(())
    }

    /// Apply a batch of feed samples to the engine.
    async fn apply(&self, reports: Vec<FeedReport>) {
        let mut applied = 0usize;
        for report in reports {
            let sample = PositionReport {
                lat: report.lat,
                lon: report.lon,
                timestamp: report.timestamp,
            };
            match self.engine.ingest_position(report.trip_id, sample).await {
                Ok(_) => applied += 1,
                Err(
                    e @ (EngineError::InvalidState { .. }
                    | EngineError::Validation(_)
                    | EngineError::NotFound { .. }),
                ) => {
                    warn!(trip_id = report.trip_id, error = %e, "Dropping position report");
                }
                Err(e) => {
                    error!(trip_id = report.trip_id, error = %e, "Failed to apply position report");
                }
            }
        }
        if applied > 0 {
            info!(applied, "Applied telemetry samples");
        }
    }
}
