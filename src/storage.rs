use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub type SubjectId = i64;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub subject_id: SubjectId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub session_id: String,
}

/// Result of writing a record. A duplicate is a normal outcome: the
/// `(subject, date)` uniqueness constraint already holds a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DailyStats {
    pub today_count: u64,
    pub total_students: u64,
    /// Percentage of active subjects marked present.
    pub attendance_rate: f64,
}

pub trait AttendanceStore: Send + Sync {
    fn subject_name(&self, id: SubjectId) -> Result<Option<String>>;

    fn has_record_on(&self, id: SubjectId, date: NaiveDate) -> Result<bool>;

    fn insert_record(&self, record: &AttendanceRecord) -> Result<InsertOutcome>;

    fn count_records_on(&self, date: NaiveDate) -> Result<u64>;

    fn count_active_subjects(&self) -> Result<u64>;

    /// Persist an operational event (startup, camera state, shutdown).
    fn log_system_event(&self, level: &str, message: &str, module: Option<&str>) -> Result<()>;
}

/// Attendance figures for `date`. Storage errors are logged and read as zero.
pub fn daily_stats(store: &dyn AttendanceStore, date: NaiveDate) -> DailyStats {
    let counts = store
        .count_records_on(date)
        .and_then(|today| Ok((today, store.count_active_subjects()?)));
    match counts {
        Ok((today_count, total_students)) => DailyStats {
            today_count,
            total_students,
            attendance_rate: if total_students > 0 {
                today_count as f64 / total_students as f64 * 100.0
            } else {
                0.0
            },
        },
        Err(err) => {
            log::error!("stats fetch failed: {:#}", err);
            DailyStats::default()
        }
    }
}

/// SQLite-backed store. Each operation opens its own connection, so the store
/// is freely shared between threads.
#[derive(Clone, Debug)]
pub struct SqliteAttendanceStore {
    path: PathBuf,
}

impl SqliteAttendanceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.ensure_schema()?;
        log::info!("attendance database ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open database {}", self.path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS students (
              student_id INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              registration_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
              is_active BOOLEAN DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS attendance (
              attendance_id INTEGER PRIMARY KEY AUTOINCREMENT,
              student_id INTEGER NOT NULL,
              attendance_date DATE NOT NULL,
              attendance_time TIME NOT NULL,
              session_id TEXT,
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
              FOREIGN KEY (student_id) REFERENCES students (student_id),
              UNIQUE(student_id, attendance_date)
            );

            CREATE TABLE IF NOT EXISTS system_logs (
              log_id INTEGER PRIMARY KEY AUTOINCREMENT,
              level TEXT NOT NULL,
              message TEXT NOT NULL,
              module TEXT,
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(attendance_date);
            "#,
        )?;
        Ok(())
    }

    /// Create or update a roster entry.
    pub fn add_subject(&self, id: SubjectId, name: &str, active: bool) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("subject name must not be empty"));
        }
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO students (student_id, name, is_active) VALUES (?1, ?2, ?3)
             ON CONFLICT(student_id) DO UPDATE SET name = excluded.name, is_active = excluded.is_active",
            params![id, name, active],
        )?;
        Ok(())
    }

    /// Records for `date`, ordered by time.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT student_id, attendance_time, session_id FROM attendance
             WHERE attendance_date = ?1 ORDER BY attendance_time, attendance_id",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (subject_id, time, session_id) = row?;
            out.push(AttendanceRecord {
                subject_id,
                date,
                time: NaiveTime::parse_from_str(&time, TIME_FORMAT)
                    .with_context(|| format!("corrupt attendance_time '{}'", time))?,
                session_id: session_id.unwrap_or_default(),
            });
        }
        Ok(out)
    }
}

impl AttendanceStore for SqliteAttendanceStore {
    fn subject_name(&self, id: SubjectId) -> Result<Option<String>> {
        let conn = self.connect()?;
        let name = conn
            .query_row(
                "SELECT name FROM students WHERE student_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    fn has_record_on(&self, id: SubjectId, date: NaiveDate) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE student_id = ?1 AND attendance_date = ?2",
            params![id, date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_record(&self, record: &AttendanceRecord) -> Result<InsertOutcome> {
        let conn = self.connect()?;
        let result = conn.execute(
            "INSERT INTO attendance (student_id, attendance_date, attendance_time, session_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.subject_id,
                record.date.format(DATE_FORMAT).to_string(),
                record.time.format(TIME_FORMAT).to_string(),
                record.session_id,
            ],
        );
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn count_records_on(&self, date: NaiveDate) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE attendance_date = ?1",
            params![date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_active_subjects(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM students WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn log_system_event(&self, level: &str, message: &str, module: Option<&str>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO system_logs (level, message, module) VALUES (?1, ?2, ?3)",
            params![level, message, module],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    subjects: HashMap<SubjectId, (String, bool)>,
    records: Vec<AttendanceRecord>,
    system_logs: Vec<(String, String, Option<String>)>,
}

/// Store kept entirely in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryAttendanceStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subject(&self, id: SubjectId, name: &str, active: bool) -> Result<()> {
        self.lock()?.subjects.insert(id, (name.to_string(), active));
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<AttendanceRecord>> {
        Ok(self.lock()?.records.clone())
    }

    pub fn system_log_count(&self) -> Result<usize> {
        Ok(self.lock()?.system_logs.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl AttendanceStore for InMemoryAttendanceStore {
    fn subject_name(&self, id: SubjectId) -> Result<Option<String>> {
        Ok(self.lock()?.subjects.get(&id).map(|(name, _)| name.clone()))
    }

    fn has_record_on(&self, id: SubjectId, date: NaiveDate) -> Result<bool> {
        Ok(self
            .lock()?
            .records
            .iter()
            .any(|r| r.subject_id == id && r.date == date))
    }

    fn insert_record(&self, record: &AttendanceRecord) -> Result<InsertOutcome> {
        let mut state = self.lock()?;
        if state
            .records
            .iter()
            .any(|r| r.subject_id == record.subject_id && r.date == record.date)
        {
            return Ok(InsertOutcome::Duplicate);
        }
        state.records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn count_records_on(&self, date: NaiveDate) -> Result<u64> {
        Ok(self.lock()?.records.iter().filter(|r| r.date == date).count() as u64)
    }

    fn count_active_subjects(&self) -> Result<u64> {
        Ok(self
            .lock()?
            .subjects
            .values()
            .filter(|(_, active)| *active)
            .count() as u64)
    }

    fn log_system_event(&self, level: &str, message: &str, module: Option<&str>) -> Result<()> {
        self.lock()?.system_logs.push((
            level.to_string(),
            message.to_string(),
            module.map(str::to_string),
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn record(id: SubjectId, date: NaiveDate) -> AttendanceRecord {
        AttendanceRecord {
            subject_id: id,
            date,
            time: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            session_id: "session-test".to_string(),
        }
    }

    #[test]
    fn sqlite_duplicate_insert_is_not_an_error() -> Result<()> {
        let dir = tempdir()?;
        let store = SqliteAttendanceStore::open(dir.path().join("attendance.db"))?;
        store.add_subject(7, "Ada", true)?;

        assert_eq!(store.insert_record(&record(7, day(4)))?, InsertOutcome::Inserted);
        assert_eq!(store.insert_record(&record(7, day(4)))?, InsertOutcome::Duplicate);
        assert_eq!(store.insert_record(&record(7, day(5)))?, InsertOutcome::Inserted);
        assert!(store.has_record_on(7, day(4))?);
        assert!(!store.has_record_on(8, day(4))?);
        assert_eq!(store.count_records_on(day(4))?, 1);
        assert_eq!(store.records_on(day(5))?, vec![record(7, day(5))]);
        Ok(())
    }

    #[test]
    fn sqlite_concurrent_inserts_yield_one_record() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(SqliteAttendanceStore::open(dir.path().join("attendance.db"))?);
        store.add_subject(7, "Ada", true)?;
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.insert_record(&record(7, day(4)))
                })
            })
            .collect();
        let mut outcomes: Vec<InsertOutcome> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<_>>()?;
        outcomes.sort_by_key(|o| *o == InsertOutcome::Duplicate);

        assert_eq!(outcomes, vec![InsertOutcome::Inserted, InsertOutcome::Duplicate]);
        assert_eq!(store.count_records_on(day(4))?, 1);
        Ok(())
    }

    #[test]
    fn sqlite_roster_and_stats() -> Result<()> {
        let dir = tempdir()?;
        let store = SqliteAttendanceStore::open(dir.path().join("attendance.db"))?;
        store.add_subject(1, "Ada", true)?;
        store.add_subject(2, "Grace", true)?;
        store.add_subject(3, "Alan", false)?;
        store.add_subject(2, "Grace Hopper", true)?;
        store.insert_record(&record(1, day(4)))?;

        assert_eq!(store.subject_name(2)?.as_deref(), Some("Grace Hopper"));
        assert_eq!(store.subject_name(9)?, None);
        assert!(store.add_subject(4, "  ", true).is_err());

        let stats = daily_stats(&store, day(4));
        assert_eq!(stats.today_count, 1);
        assert_eq!(stats.total_students, 2);
        assert!((stats.attendance_rate - 50.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn sqlite_persists_system_events() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("attendance.db");
        let store = SqliteAttendanceStore::open(&path)?;
        store.log_system_event("INFO", "camera ready", Some("camera"))?;

        let conn = Connection::open(&path)?;
        let (level, module): (String, Option<String>) = conn.query_row(
            "SELECT level, module FROM system_logs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(level, "INFO");
        assert_eq!(module.as_deref(), Some("camera"));
        Ok(())
    }

    #[test]
    fn stats_are_zero_on_storage_error() {
        let dir = tempdir().unwrap();
        let store = SqliteAttendanceStore {
            path: dir.path().join("missing").join("attendance.db"),
        };
        assert_eq!(daily_stats(&store, day(4)), DailyStats::default());
    }

    #[test]
    fn in_memory_store_enforces_uniqueness() -> Result<()> {
        let store = InMemoryAttendanceStore::new();
        store.add_subject(7, "Ada", true)?;
        store.add_subject(8, "Alan", false)?;
        assert_eq!(store.insert_record(&record(7, day(4)))?, InsertOutcome::Inserted);
        assert_eq!(store.insert_record(&record(7, day(4)))?, InsertOutcome::Duplicate);
        assert_eq!(store.count_records_on(day(4))?, 1);
        assert_eq!(store.count_active_subjects()?, 1);
        store.log_system_event("INFO", "started", None)?;
        assert_eq!(store.system_log_count()?, 1);
        Ok(())
    }
}
