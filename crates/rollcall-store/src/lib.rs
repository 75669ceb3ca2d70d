//! rollcall-store — SQLite persistence for students and attendance, and the
//! spreadsheet/summary reports built on top of it.

pub mod db;
pub mod export;

pub use db::{AttendanceRecord, DeletedCounts, RecordStore, StoreError, Student, TIMESTAMP_FORMAT};
pub use export::{AttendanceSummary, ExportError, ExportOutcome};
