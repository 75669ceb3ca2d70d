//! Attendance reports: spreadsheet export and a plain-text summary.

use crate::db::{AttendanceRecord, RecordStore, StoreError, TIMESTAMP_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column headers and width hints, in sheet order.
const COLUMNS: [(&str, f64); 5] = [
    ("ID", 8.0),
    ("Student_ID", 12.0),
    ("Name", 25.0),
    ("Enrollment_Number", 20.0),
    ("Timestamp", 20.0),
];

const ALL_RECORDS_SHEET: &str = "Attendance Records";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Result of an export request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written { path: PathBuf, rows: usize },
    /// There was nothing to export; no file was created.
    Empty,
}

/// Export every attendance record to
/// `attendance_records_<YYYYmmdd_HHMMSS>.xlsx` in `dir`.
pub fn export_all(
    store: &RecordStore,
    dir: &Path,
    now: NaiveDateTime,
) -> Result<ExportOutcome, ExportError> {
    let records = store.list_attendance()?;
    if records.is_empty() {
        tracing::info!("no attendance records to export");
        return Ok(ExportOutcome::Empty);
    }

    let path = dir.join(format!("attendance_records_{}.xlsx", now.format("%Y%m%d_%H%M%S")));
    write_sheet(&records, ALL_RECORDS_SHEET, &path)?;
    Ok(ExportOutcome::Written {
        path,
        rows: records.len(),
    })
}

/// Export the records whose timestamp falls on `date` to
/// `daily_attendance_<date>.xlsx` in `dir`.
pub fn export_daily(
    store: &RecordStore,
    date: NaiveDate,
    dir: &Path,
) -> Result<ExportOutcome, ExportError> {
    let records = records_on(store.list_attendance()?, date);
    if records.is_empty() {
        tracing::info!(%date, "no attendance records for date");
        return Ok(ExportOutcome::Empty);
    }

    let day = date.format("%Y-%m-%d");
    let path = dir.join(format!("daily_attendance_{day}.xlsx"));
    write_sheet(&records, &format!("Attendance_{day}"), &path)?;
    Ok(ExportOutcome::Written {
        path,
        rows: records.len(),
    })
}

/// Keep only records whose date component equals `date`.
pub fn records_on(records: Vec<AttendanceRecord>, date: NaiveDate) -> Vec<AttendanceRecord> {
    records
        .into_iter()
        .filter(|r| r.timestamp.date() == date)
        .collect()
}

fn write_sheet(records: &[AttendanceRecord], sheet_name: &str, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let header = Format::new().set_bold();
    for (col, (title, width)) in COLUMNS.iter().enumerate() {
        let col = col as u16;
        worksheet.write_string_with_format(0, col, *title, &header)?;
        worksheet.set_column_width(col, *width)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row = i as u32 + 1;
        worksheet.write_number(row, 0, record.id as f64)?;
        if let Some(student_id) = record.student_id {
            worksheet.write_number(row, 1, student_id as f64)?;
        }
        worksheet.write_string(row, 2, record.name.as_str())?;
        worksheet.write_string(row, 3, record.enrollment_number.as_str())?;
        worksheet.write_string(row, 4, record.timestamp.format(TIMESTAMP_FORMAT).to_string())?;
    }

    workbook.save(path)?;
    tracing::info!(path = %path.display(), rows = records.len(), sheet = sheet_name, "attendance exported");
    Ok(())
}

/// Totals over the attendance table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub total_records: usize,
    /// Distinct enrollment numbers present.
    pub unique_students: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

impl AttendanceSummary {
    /// Summarize `records`; `None` when there are none.
    pub fn from_records(records: &[AttendanceRecord]) -> Option<Self> {
        let first_date = records.iter().map(|r| r.timestamp.date()).min()?;
        let last_date = records.iter().map(|r| r.timestamp.date()).max()?;
        let unique_students = records
            .iter()
            .map(|r| r.enrollment_number.as_str())
            .collect::<HashSet<_>>()
            .len();

        Some(Self {
            total_records: records.len(),
            unique_students,
            first_date,
            last_date,
        })
    }
}

impl fmt::Display for AttendanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Attendance Summary:")?;
        writeln!(f, "- Total attendance marks: {}", self.total_records)?;
        writeln!(f, "- Unique students: {}", self.unique_students)?;
        write!(f, "- Date range: {} to {}", self.first_date, self.last_date)
    }
}

/// Summarize the whole attendance table; `None` when it is empty.
pub fn summarize(store: &RecordStore) -> Result<Option<AttendanceSummary>, StoreError> {
    Ok(AttendanceSummary::from_records(&store.list_attendance()?))
}
