//! Delivery channel strategy. The scheduler depends on the trait only;
//! adding a channel never touches scheduling logic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::NotifySettings;
use crate::engine::types::{Attendance, AttendanceStatus, NotifyMethod};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected notification: HTTP {0}")]
    Rejected(u16),
}

/// Payload handed to a delivery channel. `dedup_key` identifies the logical
/// notification so channels can suppress at-least-once duplicates.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub attendance_id: i64,
    pub student_id: i64,
    pub trip_id: i64,
    pub school_id: i64,
    pub status: AttendanceStatus,
    pub scan_time: DateTime<Utc>,
    pub dedup_key: String,
}

impl Notification {
    pub fn for_attendance(record: &Attendance) -> Self {
        Self {
            attendance_id: record.id,
            student_id: record.student_id,
            trip_id: record.trip_id,
            school_id: record.school_id,
            status: record.status,
            scan_time: record.scan_time,
            dedup_key: format!(
                "{}:{}:{}",
                record.student_id, record.trip_id, record.status
            ),
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn method(&self) -> NotifyMethod;

    /// Resolves Ok once the channel has *accepted* the notification.
    /// Actual delivery guarantees belong to the channel.
    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError>;
}

/// Thin HTTP client posting notifications to an SMS/EMAIL/APP gateway.
pub struct GatewayChannel {
    method: NotifyMethod,
    client: Client,
    endpoint: String,
}

impl GatewayChannel {
    pub fn new(method: NotifyMethod, endpoint: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            method,
            client,
            endpoint,
        })
    }
}

#[async_trait]
impl NotificationChannel for GatewayChannel {
    fn method(&self) -> NotifyMethod {
        self.method
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChannelError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Accepts everything and only logs. For deployments without a gateway.
pub struct NoopChannel;

#[async_trait]
impl NotificationChannel for NoopChannel {
    fn method(&self) -> NotifyMethod {
        NotifyMethod::None
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        info!(dedup_key = %notification.dedup_key, "Notification accepted by no-op channel");
        Ok(())
    }
}

pub fn build_channel(
    settings: &NotifySettings,
) -> Result<Arc<dyn NotificationChannel>, reqwest::Error> {
    let method = match settings.channel.as_str() {
        "sms" => NotifyMethod::Sms,
        "email" => NotifyMethod::Email,
        "app" => NotifyMethod::App,
        _ => return Ok(Arc::new(NoopChannel)),
    };
    let endpoint = settings
        .gateway_url
        .clone()
        .expect("gateway_url checked by Config::validate");
    Ok(Arc::new(GatewayChannel::new(method, endpoint)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dedup_key_is_stable_per_student_trip_status() {
        let record = Attendance {
            id: 42,
            student_id: 7,
            trip_id: 3,
            school_id: 10,
            status: AttendanceStatus::Absent,
            scan_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            notes: None,
            qr_code: None,
            notified: false,
            notify_method: NotifyMethod::None,
        };
        let notification = Notification::for_attendance(&record);
        assert_eq!(notification.dedup_key, "7:3:ABSENT");
        assert_eq!(notification.attendance_id, 42);
    }

    #[test]
    fn noop_channel_reports_method_none() {
        assert_eq!(NoopChannel.method(), NotifyMethod::None);
    }
}
