//! Background notification scheduling.
//!
//! A recurring task, decoupled from the request path that writes
//! attendance. Each cycle polls the store for notify-eligible records,
//! delivers a bounded batch through the configured channel and marks a
//! record notified only after the channel accepted it. At-least-once: a
//! crash between accept and mark re-sends next cycle, channels dedup on
//! the notification's `dedup_key`. Worst-case latency for an eligible
//! record is one poll interval plus channel latency.

mod channels;

pub use channels::{
    build_channel, ChannelError, GatewayChannel, NoopChannel, Notification, NotificationChannel,
};

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::config::NotifySettings;
use crate::engine::attendance::AttendanceStore;

pub struct NotifyManager {
    store: AttendanceStore,
    channel: Arc<dyn NotificationChannel>,
    interval_secs: u64,
    batch_size: u32,
    cutoff_secs: i64,
    concurrency: usize,
}

impl NotifyManager {
    pub fn new(
        store: AttendanceStore,
        channel: Arc<dyn NotificationChannel>,
        settings: &NotifySettings,
    ) -> Self {
        Self {
            store,
            channel,
            interval_secs: settings.interval_secs,
            batch_size: settings.batch_size,
            cutoff_secs: settings.cutoff_secs,
            concurrency: settings.concurrency,
        }
    }

    pub async fn start(self: Arc<Self>) {
        info!(
            interval_secs = self.interval_secs,
            batch_size = self.batch_size,
            channel = %self.channel.method(),
            "Starting notification loop"
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.run_cycle().await;
        }
    }

    /// One poll cycle. Returns the number of records delivered and marked.
    pub async fn run_cycle(&self) -> usize {
        let cutoff = Utc::now() - Duration::seconds(self.cutoff_secs);
        let batch = match self.store.find_unnotified(cutoff, self.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Failed to query unnotified attendance");
                return 0;
            }
        };
        if batch.is_empty() {
            return 0;
        }
        info!(count = batch.len(), "Delivering notifications");

        futures::stream::iter(batch)
            .map(|record| async move {
                let notification = Notification::for_attendance(&record);
                match self.channel.deliver(&notification).await {
                    Ok(()) => {
                        match self
                            .store
                            .mark_notified(record.id, self.channel.method())
                            .await
                        {
                            Ok(_) => true,
                            Err(e) => {
                                // Sent but not marked: next cycle re-sends,
                                // the channel dedups on the key.
                                error!(
                                    attendance_id = record.id,
                                    error = %e,
                                    "Delivered but failed to mark notified"
                                );
                                false
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            attendance_id = record.id,
                            error = %e,
                            "Notification delivery failed, will retry next cycle"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter(|delivered| futures::future::ready(*delivered))
            .count()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::attendance::RecordAttendance;
    use crate::engine::types::{AttendanceStatus, NotifyMethod};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    struct RecordingChannel {
        accepted: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self {
                accepted: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn method(&self) -> NotifyMethod {
            NotifyMethod::App
        }

        async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChannelError::Rejected(503));
            }
            self.accepted.lock().await.push(notification.dedup_key.clone());
            Ok(())
        }
    }

    async fn test_store() -> AttendanceStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");
        AttendanceStore::new(pool)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn seed_absent(store: &AttendanceStore, student_id: i64) -> i64 {
        store
            .record(RecordAttendance {
                student_id,
                trip_id: 1,
                school_id: 10,
                status: AttendanceStatus::Absent,
                scan_time: ts(student_id),
                notes: None,
                qr_code: None,
            })
            .await
            .unwrap()
            .id
    }

    fn settings(batch_size: u32) -> NotifySettings {
        NotifySettings {
            interval_secs: 30,
            batch_size,
            cutoff_secs: 900,
            concurrency: 2,
            channel: "app".to_string(),
            gateway_url: None,
        }
    }

    #[tokio::test]
    async fn cycle_marks_only_after_channel_accepts() {
        let store = test_store().await;
        let a = seed_absent(&store, 1).await;
        let b = seed_absent(&store, 2).await;

        let channel = Arc::new(RecordingChannel::new());
        let manager = NotifyManager::new(store.clone(), channel.clone(), &settings(50));

        assert_eq!(manager.run_cycle().await, 2);
        assert!(store.get(a).await.unwrap().notified);
        assert_eq!(store.get(b).await.unwrap().notify_method, NotifyMethod::App);
        assert_eq!(channel.accepted.lock().await.len(), 2);

        // Nothing left on the next cycle.
        assert_eq!(manager.run_cycle().await, 0);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_the_record_for_the_next_cycle() {
        let store = test_store().await;
        let id = seed_absent(&store, 1).await;

        let channel = Arc::new(RecordingChannel::new());
        channel.fail.store(true, Ordering::SeqCst);
        let manager = NotifyManager::new(store.clone(), channel.clone(), &settings(50));

        assert_eq!(manager.run_cycle().await, 0);
        assert!(!store.get(id).await.unwrap().notified);

        // Gateway recovers; the record goes out on the following cycle.
        channel.fail.store(false, Ordering::SeqCst);
        assert_eq!(manager.run_cycle().await, 1);
        assert!(store.get(id).await.unwrap().notified);
    }

    #[tokio::test]
    async fn batch_size_bounds_each_cycle() {
        let store = test_store().await;
        for student in 1..=5 {
            seed_absent(&store, student).await;
        }

        let channel = Arc::new(RecordingChannel::new());
        let manager = NotifyManager::new(store.clone(), channel.clone(), &settings(2));

        assert_eq!(manager.run_cycle().await, 2);
        assert_eq!(manager.run_cycle().await, 2);
        assert_eq!(manager.run_cycle().await, 1);
        assert_eq!(manager.run_cycle().await, 0);
        assert_eq!(channel.accepted.lock().await.len(), 5);
    }
}
