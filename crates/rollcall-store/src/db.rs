//! SQLite record store for students and attendance.
//!
//! Every public call runs as its own statement (or, for [`RecordStore::delete_all`],
//! its own transaction) and is committed before it returns.

use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Text layout of every stored timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    enrollment_number TEXT UNIQUE NOT NULL,
    face_encoding BLOB,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER,
    name TEXT,
    enrollment_number TEXT,
    timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_attendance_timestamp ON attendance (timestamp);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("student with enrollment number {0} already exists")]
    DuplicateKey(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        source: chrono::ParseError,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored student.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub enrollment_number: String,
    /// Encoded face embedding, if one was captured.
    #[serde(skip)]
    pub face_encoding: Option<Vec<u8>>,
    pub created_at: Option<String>,
}

/// A stored attendance mark. Name and enrollment are copied from the
/// student at the time of the mark.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: Option<i64>,
    pub name: String,
    pub enrollment_number: String,
    pub timestamp: NaiveDateTime,
}

/// Rows removed by [`RecordStore::delete_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedCounts {
    pub students: usize,
    pub attendance: usize,
}

/// Persistence for the `students` and `attendance` tables.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened record store");
        Self::init(conn)
    }

    /// Private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Insert a student and return it with its generated id.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the enrollment number is
    /// already taken; nothing is written in that case.
    pub fn create_student(
        &self,
        name: &str,
        enrollment_number: &str,
        face_encoding: Option<&[u8]>,
    ) -> Result<Student> {
        let inserted = self.conn.execute(
            "INSERT INTO students (name, enrollment_number, face_encoding) VALUES (?1, ?2, ?3)",
            params![name, enrollment_number, face_encoding],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                tracing::warn!(enrollment = enrollment_number, "duplicate enrollment rejected");
                return Err(StoreError::DuplicateKey(enrollment_number.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let id = self.conn.last_insert_rowid();
        tracing::info!(id, enrollment = enrollment_number, "student created");
        self.student_by_id(id)?
            .ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// All students in enrollment (id) order.
    pub fn list_students(&self) -> Result<Vec<Student>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, enrollment_number, face_encoding, created_at
             FROM students ORDER BY id",
        )?;
        let rows = stmt.query_map([], decode_student_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn student_by_enrollment(&self, enrollment_number: &str) -> Result<Option<Student>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, enrollment_number, face_encoding, created_at
                 FROM students WHERE enrollment_number = ?1",
                params![enrollment_number],
                decode_student_row,
            )
            .optional()?)
    }

    fn student_by_id(&self, id: i64) -> Result<Option<Student>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, enrollment_number, face_encoding, created_at
                 FROM students WHERE id = ?1",
                params![id],
                decode_student_row,
            )
            .optional()?)
    }

    /// Record attendance stamped with the current local time.
    pub fn insert_attendance(
        &self,
        student_id: i64,
        name: &str,
        enrollment_number: &str,
    ) -> Result<AttendanceRecord> {
        self.insert_attendance_at(student_id, name, enrollment_number, Local::now().naive_local())
    }

    /// Record attendance with an explicit timestamp (truncated to seconds).
    pub fn insert_attendance_at(
        &self,
        student_id: i64,
        name: &str,
        enrollment_number: &str,
        timestamp: NaiveDateTime,
    ) -> Result<AttendanceRecord> {
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        self.conn.execute(
            "INSERT INTO attendance (student_id, name, enrollment_number, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![student_id, name, enrollment_number, stamp],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(id, student_id, enrollment = enrollment_number, %stamp, "attendance recorded");

        Ok(AttendanceRecord {
            id,
            student_id: Some(student_id),
            name: name.to_string(),
            enrollment_number: enrollment_number.to_string(),
            timestamp: parse_timestamp(&stamp)?,
        })
    }

    /// All attendance records, newest first.
    pub fn list_attendance(&self) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, name, enrollment_number, timestamp
             FROM attendance ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, student_id, name, enrollment_number, stamp) = row?;
            records.push(AttendanceRecord {
                id,
                student_id,
                name: name.unwrap_or_default(),
                enrollment_number: enrollment_number.unwrap_or_default(),
                timestamp: parse_timestamp(&stamp)?,
            });
        }
        Ok(records)
    }

    pub fn count_students(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM students")
    }

    pub fn count_attendance(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM attendance")
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// Delete every attendance record. Students are untouched.
    pub fn delete_all_attendance(&self) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM attendance", [])?;
        tracing::info!(deleted, "attendance cleared");
        Ok(deleted)
    }

    /// Delete every attendance record and every student in one transaction.
    pub fn delete_all(&mut self) -> Result<DeletedCounts> {
        let tx = self.conn.transaction()?;
        let attendance = tx.execute("DELETE FROM attendance", [])?;
        let students = tx.execute("DELETE FROM students", [])?;
        tx.commit()?;

        tracing::info!(students, attendance, "all records cleared");
        Ok(DeletedCounts {
            students,
            attendance,
        })
    }
}

fn decode_student_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        enrollment_number: row.get(2)?,
        face_encoding: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Parse a stored timestamp. Fractional seconds, as written by other
/// SQLite clients, are accepted and dropped.
fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.split('.').next().unwrap_or(value);
    NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT).map_err(|source| {
        StoreError::InvalidTimestamp {
            value: value.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_create_and_fetch_student() {
        let store = RecordStore::open_in_memory().unwrap();
        let s = store.create_student("Ada", "E100", Some(&[1, 2, 3, 4])).unwrap();
        assert_eq!(s.name, "Ada");
        assert_eq!(s.face_encoding.as_deref(), Some(&[1u8, 2, 3, 4][..]));

        let fetched = store.student_by_enrollment("E100").unwrap().unwrap();
        assert_eq!(fetched, s);
        assert!(store.student_by_enrollment("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_enrollment_rejected_without_mutation() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create_student("Ada", "E100", None).unwrap();

        let err = store.create_student("Someone Else", "E100", Some(&[0; 8])).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(ref e) if e == "E100"));

        let students = store.list_students().unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "Ada");
        assert!(students[0].face_encoding.is_none());
    }

    #[test]
    fn test_list_students_in_insertion_order() {
        let store = RecordStore::open_in_memory().unwrap();
        for (name, e) in [("C", "E3"), ("A", "E1"), ("B", "E2")] {
            store.create_student(name, e, None).unwrap();
        }
        let order: Vec<_> = store
            .list_students()
            .unwrap()
            .into_iter()
            .map(|s| s.enrollment_number)
            .collect();
        assert_eq!(order, vec!["E3", "E1", "E2"]);
    }

    #[test]
    fn test_attendance_newest_first() {
        let store = RecordStore::open_in_memory().unwrap();
        let s = store.create_student("Ada", "E100", None).unwrap();
        store.insert_attendance_at(s.id, &s.name, "E100", at(2024, 1, 1, 9, 0, 0)).unwrap();
        store.insert_attendance_at(s.id, &s.name, "E100", at(2024, 1, 3, 9, 0, 0)).unwrap();
        store.insert_attendance_at(s.id, &s.name, "E100", at(2024, 1, 2, 9, 0, 0)).unwrap();

        let days: Vec<u32> = store
            .list_attendance()
            .unwrap()
            .iter()
            .map(|r| chrono::Datelike::day(&r.timestamp))
            .collect();
        assert_eq!(days, vec![3, 2, 1]);
    }

    #[test]
    fn test_insert_attendance_truncates_to_seconds() {
        let store = RecordStore::open_in_memory().unwrap();
        let ts = at(2024, 5, 6, 7, 8, 9) + chrono::Duration::milliseconds(750);
        let r = store.insert_attendance_at(1, "Ada", "E1", ts).unwrap();
        assert_eq!(r.timestamp, at(2024, 5, 6, 7, 8, 9));
        assert_eq!(store.list_attendance().unwrap()[0], r);
    }

    #[test]
    fn test_insert_attendance_uses_now() {
        let store = RecordStore::open_in_memory().unwrap();
        let before = Local::now().naive_local() - chrono::Duration::seconds(1);
        let r = store.insert_attendance(1, "Ada", "E1").unwrap();
        assert!(r.timestamp >= before);
    }

    #[test]
    fn test_delete_attendance_keeps_students() {
        let store = RecordStore::open_in_memory().unwrap();
        let s = store.create_student("Ada", "E100", None).unwrap();
        store.insert_attendance(s.id, &s.name, "E100").unwrap();
        store.insert_attendance(s.id, &s.name, "E100").unwrap();

        assert_eq!(store.delete_all_attendance().unwrap(), 2);
        assert_eq!(store.count_attendance().unwrap(), 0);
        assert_eq!(store.count_students().unwrap(), 1);
    }

    #[test]
    fn test_delete_all_reports_pre_delete_counts() {
        let mut store = RecordStore::open_in_memory().unwrap();
        for i in 0..3 {
            let s = store.create_student("S", &format!("E{i}"), None).unwrap();
            store.insert_attendance(s.id, "S", &s.enrollment_number).unwrap();
        }
        store.insert_attendance(1, "S", "E0").unwrap();

        let before = (store.count_students().unwrap(), store.count_attendance().unwrap());
        let deleted = store.delete_all().unwrap();
        assert_eq!((deleted.students, deleted.attendance), before);
        assert_eq!(deleted, DeletedCounts { students: 3, attendance: 4 });
        assert_eq!(store.count_students().unwrap(), 0);
        assert_eq!(store.count_attendance().unwrap(), 0);
    }

    #[test]
    fn test_column_default_timestamp_is_readable() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO attendance (student_id, name, enrollment_number) VALUES (1, 'A', 'E1')",
                [],
            )
            .unwrap();
        assert_eq!(store.list_attendance().unwrap().len(), 1);
    }

    #[test]
    fn test_open_creates_parent_dirs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/db/attendance.db");
        {
            let store = RecordStore::open(&path).unwrap();
            store.create_student("Ada", "E100", None).unwrap();
        }
        let store = RecordStore::open(&path).unwrap();
        assert_eq!(store.count_students().unwrap(), 1);
    }

    #[test]
    fn test_parse_timestamp_accepts_fractional_seconds() {
        assert_eq!(
            parse_timestamp("2024-01-02 23:59:59.123").unwrap(),
            at(2024, 1, 2, 23, 59, 59)
        );
        assert!(parse_timestamp("yesterday").is_err());
    }
}
