//! Attendance recording and correction.
//!
//! One row per (student, trip), enforced by a unique index; recording again
//! corrects the row in place. Last-write-wins is decided by scan time, not
//! call order: the upsert refuses to apply a sample older than the stored
//! one. All timestamps are bound through `fmt_ts`, a fixed-width UTC format,
//! so string comparison in SQL is chronological comparison.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;

use super::error::EngineError;
use super::types::{Attendance, AttendanceStats, AttendanceStatus, NotifyMethod};

/// Fixed-width UTC timestamp for storage and SQL comparison.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[derive(Debug, Clone)]
pub struct RecordAttendance {
    pub student_id: i64,
    pub trip_id: i64,
    pub school_id: i64,
    pub status: AttendanceStatus,
    pub scan_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub qr_code: Option<String>,
}

/// One correction in a bulk update. The status arrives as a string so a
/// malformed item fails on its own instead of rejecting the whole batch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BulkUpdateItem {
    pub id: i64,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, ToSchema)]
pub struct BulkUpdateOutcome {
    pub id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AttendanceStore {
    pool: SqlitePool,
}

impl AttendanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record attendance for a (student, trip) pair. First call creates the
    /// row; later calls correct it unless their scan time is older than the
    /// stored one. A status change re-arms the notified flag so guardians
    /// hear about corrections.
    pub async fn record(&self, record: RecordAttendance) -> Result<Attendance, EngineError> {
        sqlx::query(
            r#"
            INSERT INTO attendance (student_id, trip_id, school_id, status, scan_time, notes, qr_code, notified, notify_method)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'NONE')
            ON CONFLICT(student_id, trip_id) DO UPDATE SET
                status = excluded.status,
                scan_time = excluded.scan_time,
                notes = COALESCE(excluded.notes, attendance.notes),
                qr_code = COALESCE(excluded.qr_code, attendance.qr_code),
                notified = CASE WHEN attendance.status = excluded.status THEN attendance.notified ELSE 0 END,
                notify_method = CASE WHEN attendance.status = excluded.status THEN attendance.notify_method ELSE 'NONE' END
            WHERE excluded.scan_time >= attendance.scan_time
            "#,
        )
        .bind(record.student_id)
        .bind(record.trip_id)
        .bind(record.school_id)
        .bind(record.status)
        .bind(fmt_ts(&record.scan_time))
        .bind(&record.notes)
        .bind(&record.qr_code)
        .execute(&self.pool)
        .await?;

        let stored: Attendance = sqlx::query_as(
            r#"
            SELECT id, student_id, trip_id, school_id, status, scan_time, notes, qr_code, notified, notify_method
            FROM attendance
            WHERE student_id = ? AND trip_id = ?
            "#,
        )
        .bind(record.student_id)
        .bind(record.trip_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    pub async fn get(&self, id: i64) -> Result<Attendance, EngineError> {
        sqlx::query_as(
            r#"
            SELECT id, student_id, trip_id, school_id, status, scan_time, notes, qr_code, notified, notify_method
            FROM attendance
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::not_found("attendance", id))
    }

    /// Correct the status of an existing record. Resets the notified flag
    /// only when the status actually changes.
    pub async fn update_status(
        &self,
        id: i64,
        status: AttendanceStatus,
        notes: Option<String>,
    ) -> Result<Attendance, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE attendance SET
                status = ?,
                notes = COALESCE(?, notes),
                notified = CASE WHEN status = ? THEN notified ELSE 0 END,
                notify_method = CASE WHEN status = ? THEN notify_method ELSE 'NONE' END
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(&notes)
        .bind(status)
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("attendance", id));
        }
        self.get(id).await
    }

    /// Apply a batch of corrections. Each item succeeds or fails on its own;
    /// the caller gets a per-item result set, never an all-or-nothing error.
    pub async fn bulk_update(&self, items: Vec<BulkUpdateItem>) -> Vec<BulkUpdateOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let outcome = match AttendanceStatus::parse(&item.status) {
                None => Err(EngineError::Validation(format!(
                    "unknown attendance status '{}'",
                    item.status
                ))),
                Some(status) => self.update_status(item.id, status, item.notes).await.map(|_| ()),
            };
            outcomes.push(match outcome {
                Ok(()) => BulkUpdateOutcome {
                    id: item.id,
                    ok: true,
                    error: None,
                },
                Err(e) => BulkUpdateOutcome {
                    id: item.id,
                    ok: false,
                    error: Some(e.to_string()),
                },
            });
        }
        outcomes
    }

    pub async fn mark_notified(
        &self,
        id: i64,
        method: NotifyMethod,
    ) -> Result<Attendance, EngineError> {
        let result = sqlx::query("UPDATE attendance SET notified = 1, notify_method = ? WHERE id = ?")
            .bind(method)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("attendance", id));
        }
        self.get(id).await
    }

    /// Records eligible for notification: unnotified and either past the
    /// cutoff or ABSENT/LATE (those are always notify-eligible, guardians
    /// need prompt alerts). Ordered by scan time, bounded by `limit`.
    pub async fn find_unnotified(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Attendance>, EngineError> {
        let records = sqlx::query_as(
            r#"
            SELECT id, student_id, trip_id, school_id, status, scan_time, notes, qr_code, notified, notify_method
            FROM attendance
            WHERE notified = 0 AND (scan_time <= ? OR status IN ('ABSENT', 'LATE'))
            ORDER BY scan_time ASC
            LIMIT ?
            "#,
        )
        .bind(fmt_ts(&cutoff))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn student_stats(
        &self,
        student_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AttendanceStats, EngineError> {
        let statuses: Vec<AttendanceStatus> = sqlx::query_scalar(
            "SELECT status FROM attendance WHERE student_id = ? AND scan_time >= ? AND scan_time <= ?",
        )
        .bind(student_id)
        .bind(fmt_ts(&start))
        .bind(fmt_ts(&end))
        .fetch_all(&self.pool)
        .await?;
        Ok(AttendanceStats::from_statuses(statuses))
    }

    pub async fn school_stats(
        &self,
        school_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AttendanceStats, EngineError> {
        let statuses: Vec<AttendanceStatus> = sqlx::query_scalar(
            "SELECT status FROM attendance WHERE school_id = ? AND scan_time >= ? AND scan_time <= ?",
        )
        .bind(school_id)
        .bind(fmt_ts(&start))
        .bind(fmt_ts(&end))
        .fetch_all(&self.pool)
        .await?;
        Ok(AttendanceStats::from_statuses(statuses))
    }

    pub async fn count(&self) -> Result<u64, EngineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// The raw rows behind a school report; formatting is the caller's
    /// concern.
    pub async fn school_report(
        &self,
        school_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Attendance>, EngineError> {
        let records = sqlx::query_as(
            r#"
            SELECT id, student_id, trip_id, school_id, status, scan_time, notes, qr_code, notified, notify_method
            FROM attendance
            WHERE school_id = ? AND scan_time >= ? AND scan_time <= ?
            ORDER BY scan_time ASC
            "#,
        )
        .bind(school_id)
        .bind(fmt_ts(&start))
        .bind(fmt_ts(&end))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> AttendanceStore {
        // A single connection: each :memory: connection is its own database.
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

    fn scan(student_id: i64, status: AttendanceStatus, secs: i64) -> RecordAttendance {
        RecordAttendance {
            student_id,
            trip_id: 1,
            school_id: 10,
            status,
            scan_time: ts(secs),
            notes: None,
            qr_code: None,
        }
    }

    #[tokio::test]
    async fn first_scan_creates_second_corrects_one_row() {
        let store = test_store().await;
        let first = store
            .record(scan(1, AttendanceStatus::Present, 0))
            .await
            .unwrap();
        assert_eq!(first.status, AttendanceStatus::Present);

        let second = store
            .record(scan(1, AttendanceStatus::Late, 60))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, AttendanceStatus::Late);

        let all = store
            .find_unnotified(ts(10_000), 100)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn earlier_scan_never_overwrites_a_later_one() {
        let store = test_store().await;
        store.record(scan(1, AttendanceStatus::Present, 100)).await.unwrap();
        store.record(scan(1, AttendanceStatus::Late, 200)).await.unwrap();

        // A replayed t1 report arrives after t2 was stored.
        let stored = store
            .record(scan(1, AttendanceStatus::Absent, 100))
            .await
            .unwrap();
        assert_eq!(stored.status, AttendanceStatus::Late);
        assert_eq!(stored.scan_time, ts(200));
    }

    #[tokio::test]
    async fn status_change_resets_the_notified_flag() {
        let store = test_store().await;
        let rec = store.record(scan(1, AttendanceStatus::Present, 0)).await.unwrap();
        let rec = store.mark_notified(rec.id, NotifyMethod::App).await.unwrap();
        assert!(rec.notified);
        assert_eq!(rec.notify_method, NotifyMethod::App);

        // Same status again: stays notified.
        let rec = store.record(scan(1, AttendanceStatus::Present, 60)).await.unwrap();
        assert!(rec.notified);

        // Correction to a different status re-arms notification.
        let rec = store
            .update_status(rec.id, AttendanceStatus::Absent, Some("left early".into()))
            .await
            .unwrap();
        assert!(!rec.notified);
        assert_eq!(rec.notify_method, NotifyMethod::None);
        assert_eq!(rec.notes.as_deref(), Some("left early"));
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let store = test_store().await;
        let err = store
            .update_status(999, AttendanceStatus::Present, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn bulk_update_reports_per_item() {
        let store = test_store().await;
        let a = store.record(scan(1, AttendanceStatus::Present, 0)).await.unwrap();
        let b = store.record(scan(2, AttendanceStatus::Present, 0)).await.unwrap();

        let outcomes = store
            .bulk_update(vec![
                BulkUpdateItem {
                    id: a.id,
                    status: "EXCUSED".into(),
                    notes: None,
                },
                BulkUpdateItem {
                    id: 999,
                    status: "ABSENT".into(),
                    notes: None,
                },
                BulkUpdateItem {
                    id: b.id,
                    status: "SICK".into(),
                    notes: None,
                },
            ])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].ok);
        assert!(!outcomes[1].ok);
        assert!(outcomes[1].error.as_deref().unwrap().contains("not found"));
        assert!(!outcomes[2].ok);
        assert!(outcomes[2].error.as_deref().unwrap().contains("SICK"));

        // The failed items left the other rows corrected.
        assert_eq!(store.get(a.id).await.unwrap().status, AttendanceStatus::Excused);
        assert_eq!(store.get(b.id).await.unwrap().status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn unnotified_query_honors_cutoff_and_status() {
        let store = test_store().await;
        // Old PRESENT: eligible via cutoff.
        let old_present = store.record(scan(1, AttendanceStatus::Present, 0)).await.unwrap();
        // Fresh PRESENT: not yet eligible.
        store.record(scan(2, AttendanceStatus::Present, 5_000)).await.unwrap();
        // Fresh ABSENT and LATE: always eligible.
        let fresh_absent = store.record(scan(3, AttendanceStatus::Absent, 5_000)).await.unwrap();
        let fresh_late = store.record(scan(4, AttendanceStatus::Late, 5_000)).await.unwrap();
        // Notified ABSENT: never returned.
        let done = store.record(scan(5, AttendanceStatus::Absent, 0)).await.unwrap();
        store.mark_notified(done.id, NotifyMethod::Sms).await.unwrap();

        let eligible = store.find_unnotified(ts(1_000), 100).await.unwrap();
        let ids: Vec<i64> = eligible.iter().map(|a| a.id).collect();
        assert!(ids.contains(&old_present.id));
        assert!(ids.contains(&fresh_absent.id));
        assert!(ids.contains(&fresh_late.id));
        assert_eq!(ids.len(), 3);
        assert!(eligible.iter().all(|a| !a.notified));
    }

    #[tokio::test]
    async fn unnotified_query_is_bounded_and_ordered() {
        let store = test_store().await;
        for i in 0..5 {
            store
                .record(scan(i, AttendanceStatus::Absent, 100 - i))
                .await
                .unwrap();
        }
        let batch = store.find_unnotified(ts(0), 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        // Oldest scan times first.
        assert!(batch.windows(2).all(|w| w[0].scan_time <= w[1].scan_time));
    }

    #[tokio::test]
    async fn stats_percentage_and_window() {
        let store = test_store().await;
        let statuses = [
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Absent,
            AttendanceStatus::Late,
        ];
        for (i, status) in statuses.into_iter().enumerate() {
            // One record per trip so rows do not collapse onto one pair.
            store
                .record(RecordAttendance {
                    student_id: 7,
                    trip_id: i as i64,
                    school_id: 10,
                    status,
                    scan_time: ts(i as i64 * 60),
                    notes: None,
                    qr_code: None,
                })
                .await
                .unwrap();
        }
        // A record outside the window.
        store
            .record(RecordAttendance {
                student_id: 7,
                trip_id: 99,
                school_id: 10,
                status: AttendanceStatus::Absent,
                scan_time: ts(100_000),
                notes: None,
                qr_code: None,
            })
            .await
            .unwrap();

        let stats = store.student_stats(7, ts(0), ts(9_000)).await.unwrap();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.present, 7);
        assert_eq!(stats.percentage, 70.0);

        let school = store.school_stats(10, ts(0), ts(9_000)).await.unwrap();
        assert_eq!(school.total, 10);

        let empty = store.student_stats(8, ts(0), ts(9_000)).await.unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.percentage, 0.0);
    }

    #[tokio::test]
    async fn school_report_is_ordered_and_windowed() {
        let store = test_store().await;
        store.record(scan(1, AttendanceStatus::Present, 300)).await.unwrap();
        store.record(scan(2, AttendanceStatus::Absent, 100)).await.unwrap();
        store.record(scan(3, AttendanceStatus::Late, 200_000)).await.unwrap();

        let report = store.school_report(10, ts(0), ts(10_000)).await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].student_id, 2);
        assert_eq!(report[1].student_id, 1);
    }
}
