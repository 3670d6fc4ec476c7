use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::{AttendanceStatus, Embedding};
use rusqlite::params;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("queue database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("failed to encode embedding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A locally queued attendance mark not yet confirmed by the remote service.
#[derive(Debug, Clone)]
pub struct AttendanceIntent {
    /// Local sequence id, monotonic per queue.
    pub id: i64,
    pub session_id: String,
    pub class_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    /// Wall-clock time of day (`HH:mm:ss`) captured when the mark was produced.
    pub time: String,
    pub captured_offline: bool,
    pub synced: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// Insert payload for an attendance intent; the queue assigns the id and
/// `synced = false`.
#[derive(Debug, Clone)]
pub struct NewAttendanceIntent {
    pub session_id: String,
    pub class_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub time: String,
    pub captured_offline: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// A locally queued student enrollment not yet accepted by the remote service.
#[derive(Debug, Clone)]
pub struct EnrollmentIntent {
    pub id: i64,
    /// Client-generated correlation id, stable across retries.
    pub intent_id: Uuid,
    pub full_name: String,
    pub roll_no: String,
    pub class_id: String,
    pub embedding: Embedding,
    pub embedding_version: i64,
    pub synced: bool,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEnrollmentIntent {
    pub full_name: String,
    pub roll_no: String,
    pub class_id: String,
    pub embedding: Embedding,
    pub embedding_version: i64,
    pub enqueued_at: DateTime<Utc>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pending_attendance (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id       TEXT NOT NULL,
    class_id         TEXT NOT NULL,
    student_id       TEXT NOT NULL,
    status           TEXT NOT NULL,
    time             TEXT NOT NULL,
    captured_offline INTEGER NOT NULL,
    synced           INTEGER NOT NULL DEFAULT 0,
    enqueued_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pending_attendance_synced
    ON pending_attendance (synced);
CREATE TABLE IF NOT EXISTS pending_enrollments (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    intent_id         TEXT NOT NULL UNIQUE,
    full_name         TEXT NOT NULL,
    roll_no           TEXT NOT NULL,
    class_id          TEXT NOT NULL,
    embedding         TEXT NOT NULL,
    embedding_version INTEGER NOT NULL,
    synced            INTEGER NOT NULL DEFAULT 0,
    enqueued_at       TEXT NOT NULL
);
";

/// Durable local queue of attendance and enrollment intents.
///
/// Append/mark-only: callers enqueue, flip the synced flag, and prune old
/// synced rows. Rows are never deleted-and-reinserted, so concurrent readers
/// (session controller enqueuing, sync engine marking) cannot lose updates.
#[derive(Clone)]
pub struct OfflineQueue {
    conn: tokio_rusqlite::Connection,
}

impl OfflineQueue {
    /// Open (and create if needed) the queue database at `path`.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            // Best effort; open reports the real error if this fails.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    /// In-memory queue, used by tests. Not durable.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Append an attendance intent; returns its local sequence id.
    pub async fn enqueue_attendance(
        &self,
        intent: NewAttendanceIntent,
    ) -> Result<i64, StoreError> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO pending_attendance
                     (session_id, class_id, student_id, status, time, captured_offline, synced, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                    params![
                        intent.session_id,
                        intent.class_id,
                        intent.student_id,
                        intent.status.as_str(),
                        intent.time,
                        intent.captured_offline as i64,
                        format_ts(&intent.enqueued_at),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Snapshot of unsynced attendance intents in insertion order.
    pub async fn pending_attendance(&self) -> Result<Vec<AttendanceIntent>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, class_id, student_id, status, time,
                            captured_offline, synced, enqueued_at
                     FROM pending_attendance
                     WHERE synced = 0
                     ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], row_to_attendance)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Mark attendance intents as synced. Idempotent: already-synced or
    /// unknown ids are no-ops.
    pub async fn mark_attendance_synced(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        self.conn
            .call(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(",");
                let sql = format!(
                    "UPDATE pending_attendance SET synced = 1 WHERE id IN ({placeholders})"
                );
                conn.execute(&sql, rusqlite::params_from_iter(ids))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Append an enrollment intent; returns its local sequence id.
    pub async fn enqueue_enrollment(
        &self,
        intent: NewEnrollmentIntent,
    ) -> Result<i64, StoreError> {
        let intent_id = Uuid::new_v4();
        let embedding_json = serde_json::to_string(&intent.embedding.values)?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO pending_enrollments
                     (intent_id, full_name, roll_no, class_id, embedding, embedding_version, synced, enqueued_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                    params![
                        intent_id.to_string(),
                        intent.full_name,
                        intent.roll_no,
                        intent.class_id,
                        embedding_json,
                        intent.embedding_version,
                        format_ts(&intent.enqueued_at),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Snapshot of unsynced enrollment intents in insertion order.
    pub async fn pending_enrollments(&self) -> Result<Vec<EnrollmentIntent>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, intent_id, full_name, roll_no, class_id, embedding,
                            embedding_version, synced, enqueued_at
                     FROM pending_enrollments
                     WHERE synced = 0
                     ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], row_to_enrollment)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Mark enrollment intents as synced. Idempotent.
    pub async fn mark_enrollments_synced(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        self.conn
            .call(move |conn| {
                let placeholders = vec!["?"; ids.len()].join(",");
                let sql = format!(
                    "UPDATE pending_enrollments SET synced = 1 WHERE id IN ({placeholders})"
                );
                conn.execute(&sql, rusqlite::params_from_iter(ids))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete synced intents enqueued before the retention window.
    /// Returns the number of rows removed across both tables.
    pub async fn prune_synced(&self, older_than: chrono::Duration) -> Result<usize, StoreError> {
        let cutoff = format_ts(&(Utc::now() - older_than));
        let removed = self
            .conn
            .call(move |conn| {
                let a = conn.execute(
                    "DELETE FROM pending_attendance WHERE synced = 1 AND enqueued_at < ?1",
                    params![cutoff],
                )?;
                let e = conn.execute(
                    "DELETE FROM pending_enrollments WHERE synced = 1 AND enqueued_at < ?1",
                    params![cutoff],
                )?;
                Ok(a + e)
            })
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "pruned synced queue entries");
        }
        Ok(removed)
    }

    /// Pending (attendance, enrollment) counts, for status surfaces.
    pub async fn pending_counts(&self) -> Result<(usize, usize), StoreError> {
        let counts = self
            .conn
            .call(|conn| {
                let a: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pending_attendance WHERE synced = 0",
                    [],
                    |row| row.get(0),
                )?;
                let e: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pending_enrollments WHERE synced = 0",
                    [],
                    |row| row.get(0),
                )?;
                Ok((a as usize, e as usize))
            })
            .await?;
        Ok(counts)
    }
}

/// RFC 3339 with fixed microsecond precision so string comparison in SQL
/// orders chronologically.
fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(8, e))
}

fn decode_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_attendance(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceIntent> {
    let status: String = row.get(4)?;
    let enqueued_at: String = row.get(8)?;
    Ok(AttendanceIntent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        class_id: row.get(2)?,
        student_id: row.get(3)?,
        status: status
            .parse()
            .map_err(|e: String| decode_error(4, std::io::Error::other(e)))?,
        time: row.get(5)?,
        captured_offline: row.get::<_, i64>(6)? != 0,
        synced: row.get::<_, i64>(7)? != 0,
        enqueued_at: parse_ts(&enqueued_at)?,
    })
}

fn row_to_enrollment(row: &rusqlite::Row<'_>) -> rusqlite::Result<EnrollmentIntent> {
    let intent_id: String = row.get(1)?;
    let embedding_json: String = row.get(5)?;
    let enqueued_at: String = row.get(8)?;
    let values: Vec<f32> =
        serde_json::from_str(&embedding_json).map_err(|e| decode_error(5, e))?;
    Ok(EnrollmentIntent {
        id: row.get(0)?,
        intent_id: Uuid::parse_str(&intent_id).map_err(|e| decode_error(1, e))?,
        full_name: row.get(2)?,
        roll_no: row.get(3)?,
        class_id: row.get(4)?,
        embedding: Embedding::new(values),
        embedding_version: row.get(6)?,
        synced: row.get::<_, i64>(7)? != 0,
        enqueued_at: parse_ts(&enqueued_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn intent(student: &str, session: &str, class: &str) -> NewAttendanceIntent {
        NewAttendanceIntent {
            session_id: session.into(),
            class_id: class.into(),
            student_id: student.into(),
            status: AttendanceStatus::Present,
            time: "09:15:00".into(),
            captured_offline: true,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_assigns_monotonic_ids() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        let a = queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();
        let b = queue.enqueue_attendance(intent("s2", "sess", "c1")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_pending_in_insertion_order_and_unsynced() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        for s in ["s1", "s2", "s3"] {
            queue.enqueue_attendance(intent(s, "sess", "c1")).await.unwrap();
        }

        let pending = queue.pending_attendance().await.unwrap();
        let students: Vec<_> = pending.iter().map(|i| i.student_id.as_str()).collect();
        assert_eq!(students, ["s1", "s2", "s3"]);
        assert!(pending.iter().all(|i| !i.synced));
        assert!(pending.iter().all(|i| i.captured_offline));
    }

    #[tokio::test]
    async fn test_mark_synced_removes_from_pending() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        let a = queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();
        queue.enqueue_attendance(intent("s2", "sess", "c1")).await.unwrap();

        queue.mark_attendance_synced(&[a]).await.unwrap();
        let pending = queue.pending_attendance().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].student_id, "s2");
    }

    #[tokio::test]
    async fn test_mark_synced_idempotent_and_tolerant_of_unknown_ids() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        let a = queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();

        queue.mark_attendance_synced(&[a]).await.unwrap();
        queue.mark_attendance_synced(&[a, 9999]).await.unwrap();
        queue.mark_attendance_synced(&[]).await.unwrap();

        assert!(queue.pending_attendance().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_respects_retention_window() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();

        let mut old = intent("old", "sess", "c1");
        old.enqueued_at = Utc::now() - Duration::days(8);
        let mut recent = intent("recent", "sess", "c1");
        recent.enqueued_at = Utc::now() - Duration::days(6);

        let old_id = queue.enqueue_attendance(old).await.unwrap();
        let recent_id = queue.enqueue_attendance(recent).await.unwrap();
        queue
            .mark_attendance_synced(&[old_id, recent_id])
            .await
            .unwrap();

        let removed = queue.prune_synced(Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_prune_never_touches_pending_rows() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        let mut stale = intent("stale", "sess", "c1");
        stale.enqueued_at = Utc::now() - Duration::days(30);
        queue.enqueue_attendance(stale).await.unwrap();

        let removed = queue.prune_synced(Duration::days(7)).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(queue.pending_attendance().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = OfflineQueue::open(&path).await.unwrap();
            for s in ["s1", "s2", "s3", "s4"] {
                queue.enqueue_attendance(intent(s, "sess", "c1")).await.unwrap();
            }
        }

        let queue = OfflineQueue::open(&path).await.unwrap();
        let pending = queue.pending_attendance().await.unwrap();
        let students: Vec<_> = pending.iter().map(|i| i.student_id.as_str()).collect();
        assert_eq!(students, ["s1", "s2", "s3", "s4"]);
        assert!(pending.iter().all(|i| !i.synced));
    }

    #[tokio::test]
    async fn test_enrollment_round_trip() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        queue
            .enqueue_enrollment(NewEnrollmentIntent {
                full_name: "Ada Lovelace".into(),
                roll_no: "CS-01".into(),
                class_id: "c1".into(),
                embedding: Embedding::new(vec![0.25; 128]),
                embedding_version: 1,
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap();

        let pending = queue.pending_enrollments().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].full_name, "Ada Lovelace");
        assert_eq!(pending[0].embedding.dim(), 128);
        assert!(!pending[0].synced);

        queue
            .mark_enrollments_synced(&[pending[0].id])
            .await
            .unwrap();
        assert!(queue.pending_enrollments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_counts() {
        let queue = OfflineQueue::open_in_memory().await.unwrap();
        queue.enqueue_attendance(intent("s1", "sess", "c1")).await.unwrap();
        queue.enqueue_attendance(intent("s2", "sess", "c1")).await.unwrap();

        let (attendance, enrollments) = queue.pending_counts().await.unwrap();
        assert_eq!(attendance, 2);
        assert_eq!(enrollments, 0);
    }
}
