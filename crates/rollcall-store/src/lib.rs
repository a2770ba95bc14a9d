//! rollcall-store — SQLite persistence for attendance.
//!
//! Two append-only tables: `attendance_events` (one row per mark) and
//! `captured_frames` (one row per saved best frame). Timestamps are stored as
//! local wall-clock text in [`TIMESTAMP_FORMAT`].

mod migrations;

use chrono::NaiveDateTime;
use rollcall_core::{
    AttendanceEvent, AttendanceStatus, AttendanceStore, BestFrameRecord, FrameRecordStore,
    PresenceKey, StoreError, TIMESTAMP_FORMAT,
};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub use migrations::CURRENT_SCHEMA_VERSION;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("database schema version {found} is newer than supported ({supported})")]
    SchemaTooNew { found: i32, supported: i32 },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database lock poisoned")]
    Poisoned,
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Corrupt(msg) => StoreError::Corrupt(msg),
            other => StoreError::backend(other),
        }
    }
}

/// `$XDG_DATA_HOME/rollcall/attendance.db`, falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/attendance.db")
}

/// Filter for [`SqliteStore::events`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub subject: Option<String>,
    pub person: Option<String>,
    pub status: Option<AttendanceStatus>,
}

/// Per-subject attendance totals (distinct people per status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
}

/// Shared handle to the attendance database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DbError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, DbError> {
        migrations::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn insert_event(&self, event: &AttendanceEvent) -> Result<i64, DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO attendance_events (person, subject, status, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.person,
                event.subject,
                event.status.as_str(),
                event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_frame(&self, record: &BestFrameRecord) -> Result<i64, DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO captured_frames (subject, captured_at, face_count, image_path)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.subject,
                record.captured_at.format(TIMESTAMP_FORMAT).to_string(),
                record.face_count as i64,
                record.image_path,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Events matching `filter`, oldest first.
    pub fn events(&self, filter: &EventFilter) -> Result<Vec<AttendanceEvent>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT person, subject, status, recorded_at FROM attendance_events
             WHERE (?1 IS NULL OR subject = ?1)
               AND (?2 IS NULL OR person = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY recorded_at, id",
        )?;
        let rows = stmt.query_map(
            params![
                filter.subject,
                filter.person,
                filter.status.map(|s| s.as_str()),
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            let (person, subject, status, recorded_at) = row?;
            events.push(AttendanceEvent {
                person,
                subject,
                status: status
                    .parse()
                    .map_err(|e: rollcall_core::UnknownStatus| DbError::Corrupt(e.to_string()))?,
                timestamp: parse_timestamp(&recorded_at)?,
            });
        }
        Ok(events)
    }

    /// Saved best frames, newest first.
    pub fn frames(&self, subject: Option<&str>) -> Result<Vec<BestFrameRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT subject, captured_at, face_count, image_path FROM captured_frames
             WHERE (?1 IS NULL OR subject = ?1)
             ORDER BY captured_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![subject], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut frames = Vec::new();
        for row in rows {
            let (subject, captured_at, face_count, image_path) = row?;
            frames.push(BestFrameRecord {
                subject,
                captured_at: parse_timestamp(&captured_at)?,
                face_count: usize::try_from(face_count)
                    .map_err(|_| DbError::Corrupt(format!("negative face count {face_count}")))?,
                image_path,
            });
        }
        Ok(frames)
    }

    /// Distinct people per status for every subject seen, sorted by subject.
    pub fn summary(&self) -> Result<Vec<SubjectSummary>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT subject,
                    COUNT(DISTINCT CASE WHEN status = 'Present' THEN person END),
                    COUNT(DISTINCT CASE WHEN status = 'Late' THEN person END),
                    COUNT(DISTINCT CASE WHEN status = 'Absent' THEN person END)
             FROM attendance_events
             GROUP BY subject
             ORDER BY subject",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SubjectSummary {
                subject: row.get(0)?,
                present: row.get::<_, i64>(1)? as usize,
                late: row.get::<_, i64>(2)? as usize,
                absent: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, DbError> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map_err(|e| DbError::Corrupt(format!("bad timestamp '{text}': {e}")))
}

impl AttendanceStore for SqliteStore {
    fn record_event(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        self.insert_event(event)?;
        Ok(())
    }

    fn present_keys(&self) -> Result<Vec<PresenceKey>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT person, subject FROM attendance_events
                 WHERE status = 'Present'",
            )
            .map_err(StoreError::backend)?;
        let keys = stmt
            .query_map([], |row| Ok(PresenceKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;
        Ok(keys)
    }
}

impl FrameRecordStore for SqliteStore {
    fn record_frame(&self, record: &BestFrameRecord) -> Result<(), StoreError> {
        self.insert_frame(record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollcall_core::AttendanceLedger;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn event(person: &str, subject: &str, status: AttendanceStatus, ts: NaiveDateTime) -> AttendanceEvent {
        AttendanceEvent {
            person: person.into(),
            subject: subject.into(),
            status,
            timestamp: ts,
        }
    }

    #[test]
    fn test_event_roundtrip_and_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_event(&event("ana", "Math", AttendanceStatus::Present, at(9, 1))).unwrap();
        store.insert_event(&event("ben", "Math", AttendanceStatus::Late, at(9, 20))).unwrap();
        store.insert_event(&event("ana", "Physics", AttendanceStatus::Absent, at(11, 0))).unwrap();

        let all = store.events(&EventFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], event("ana", "Math", AttendanceStatus::Present, at(9, 1)));

        let math = store
            .events(&EventFilter {
                subject: Some("Math".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(math.len(), 2);

        let late = store
            .events(&EventFilter {
                status: Some(AttendanceStatus::Late),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].person, "ben");

        let ana = store
            .events(&EventFilter {
                person: Some("ana".into()),
                subject: Some("Physics".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ana[0].status, AttendanceStatus::Absent);
    }

    #[test]
    fn test_present_keys_only_counts_present() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_event(&event("ana", "Math", AttendanceStatus::Present, at(9, 1))).unwrap();
        store.insert_event(&event("ana", "Math", AttendanceStatus::Present, at(9, 2))).unwrap();
        store.insert_event(&event("ben", "Math", AttendanceStatus::Absent, at(10, 0))).unwrap();

        let keys = store.present_keys().unwrap();
        assert_eq!(keys, vec![PresenceKey::new("ana", "Math")]);
    }

    #[test]
    fn test_ledger_seeds_from_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let mut ledger = AttendanceLedger::initialize(store).unwrap();
            ledger.mark_present("ana", "Math", at(9, 1)).unwrap();
        }

        // A restart on the same day must not mark ana twice.
        let store = SqliteStore::open(&path).unwrap();
        let mut ledger = AttendanceLedger::initialize(store.clone()).unwrap();
        assert!(ledger.is_marked("ana", "Math"));
        ledger.mark_present("ana", "Math", at(9, 30)).unwrap();
        ledger.mark_present("ben", "Math", at(9, 31)).unwrap();

        let present = store
            .events(&EventFilter {
                status: Some(AttendanceStatus::Present),
                ..Default::default()
            })
            .unwrap();
        let people: Vec<&str> = present.iter().map(|e| e.person.as_str()).collect();
        assert_eq!(people, vec!["ana", "ben"]);
    }

    #[test]
    fn test_frames_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (subject, ts, count) in [("Math", at(9, 59), 4), ("Physics", at(11, 59), 2)] {
            store
                .record_frame(&BestFrameRecord {
                    subject: subject.into(),
                    captured_at: ts,
                    face_count: count,
                    image_path: format!("captured_frames/{subject}.jpg"),
                })
                .unwrap();
        }

        let frames = store.frames(None).unwrap();
        assert_eq!(frames[0].subject, "Physics");
        assert_eq!(frames[1].face_count, 4);
        assert_eq!(store.frames(Some("Math")).unwrap().len(), 1);
        assert!(store.frames(Some("Art")).unwrap().is_empty());
    }

    #[test]
    fn test_summary_counts_distinct_people() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_event(&event("ana", "Math", AttendanceStatus::Present, at(9, 1))).unwrap();
        store.insert_event(&event("ana", "Math", AttendanceStatus::Present, at(9, 5))).unwrap();
        store.insert_event(&event("ben", "Math", AttendanceStatus::Late, at(9, 20))).unwrap();
        store.insert_event(&event("cy", "Math", AttendanceStatus::Absent, at(10, 0))).unwrap();
        store.insert_event(&event("cy", "Art", AttendanceStatus::Present, at(13, 0))).unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(
            summary,
            vec![
                SubjectSummary { subject: "Art".into(), present: 1, late: 0, absent: 0 },
                SubjectSummary { subject: "Math".into(), present: 1, late: 1, absent: 1 },
            ]
        );
    }

    #[test]
    fn test_corrupt_timestamp_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO attendance_events (person, subject, status, recorded_at)
                 VALUES ('ana', 'Math', 'Present', 'yesterday')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.events(&EventFilter::default()),
            Err(DbError::Corrupt(_))
        ));
    }
}
