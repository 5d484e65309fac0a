//! Attendance ledger: one record per person per day, in a CSV file.
//!
//! The `(name, date)` index is hydrated from the file once at open and kept
//! in memory; new records are appended to the file, which is never rewritten.
//! There is no locking: two processes sharing one file can both record the
//! same person. A crash mid-append can leave a truncated last row, which the
//! next open skips with a warning.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: [&str; 3] = ["Name", "Date", "Time"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path} does not look like an attendance ledger (header {found:?})")]
    BadHeader { path: PathBuf, found: Vec<String> },
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date", with = "date_column")]
    pub date: NaiveDate,
    #[serde(rename = "Time", with = "time_column")]
    pub time: NaiveTime,
}

/// Result of a check-and-append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded(AttendanceRecord),
    AlreadyMarked,
}

pub struct Ledger {
    path: PathBuf,
    marked: HashSet<(String, NaiveDate)>,
    records: Vec<AttendanceRecord>,
}

impl Ledger {
    /// Open the ledger at `path` for recording, creating a header-only
    /// file if absent and closing off a row left truncated by a crash.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };

        if is_empty(path).map_err(io_err)? {
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(HEADER)?;
            writer.flush().map_err(io_err)?;
            tracing::info!(path = %path.display(), "created attendance ledger");
        } else {
            repair_tail(path).map_err(io_err)?;
        }

        Self::hydrate(path)
    }

    /// Load the ledger at `path` without touching the file.
    ///
    /// A missing or empty file reads as an empty ledger.
    pub fn read(path: &Path) -> Result<Self, LedgerError> {
        let empty = is_empty(path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if empty {
            return Ok(Self {
                path: path.to_path_buf(),
                marked: HashSet::new(),
                records: Vec::new(),
            });
        }
        Self::hydrate(path)
    }

    fn hydrate(path: &Path) -> Result<Self, LedgerError> {
        let mut reader = csv::Reader::from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header != HEADER {
            return Err(LedgerError::BadHeader {
                path: path.to_path_buf(),
                found: header,
            });
        }

        let mut ledger = Self {
            path: path.to_path_buf(),
            marked: HashSet::new(),
            records: Vec::new(),
        };
        for row in reader.deserialize::<AttendanceRecord>() {
            match row {
                Ok(record) => ledger.index(record),
                Err(e) => {
                    let line = e.position().map(|p| p.line());
                    tracing::warn!(path = %path.display(), ?line, error = %e, "skipping malformed ledger row");
                }
            }
        }

        tracing::info!(path = %path.display(), records = ledger.records.len(), "attendance ledger opened");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn already_marked(&self, name: &str, date: NaiveDate) -> bool {
        self.marked.contains(&(name.to_string(), date))
    }

    /// Append a record unless `(name, date)` is already present.
    ///
    /// Returns whether a row was written.
    pub fn append(&mut self, name: &str, date: NaiveDate, time: NaiveTime) -> Result<bool, LedgerError> {
        Ok(self.insert(name, date, time)?.is_some())
    }

    /// Record `name` for the day of `at`, once.
    pub fn mark(&mut self, name: &str, at: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let date = at.date();
        match self.insert(name, date, at.time())? {
            Some(record) => {
                tracing::info!(name, %date, time = %record.time.format(TIME_FORMAT), "marked attendance");
                Ok(MarkOutcome::Recorded(record))
            }
            None => {
                tracing::info!(name, %date, "already marked today");
                Ok(MarkOutcome::AlreadyMarked)
            }
        }
    }

    /// All records in file order.
    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn records_on(&self, date: NaiveDate) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.iter().filter(move |r| r.date == date)
    }

    fn insert(&mut self, name: &str, date: NaiveDate, time: NaiveTime) -> Result<Option<AttendanceRecord>, LedgerError> {
        if self.already_marked(name, date) {
            return Ok(None);
        }
        let record = AttendanceRecord {
            name: name.to_string(),
            date,
            time: time.with_nanosecond(0).unwrap_or(time),
        };

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let file = OpenOptions::new().append(true).open(&self.path).map_err(io_err)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(&record)?;
        writer.flush().map_err(io_err)?;

        self.index(record.clone());
        Ok(Some(record))
    }

    fn index(&mut self, record: AttendanceRecord) {
        if self.marked.insert((record.name.clone(), record.date)) {
            self.records.push(record);
        }
    }
}

fn is_empty(path: &Path) -> std::io::Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

/// Make sure a following append starts a fresh record.
///
/// Quotes inside fields are doubled, so an odd quote count means the last
/// row was cut off inside a quoted field. Closing the quote leaves that row a
/// single malformed record.
fn repair_tail(path: &Path) -> std::io::Result<()> {
    let contents = std::fs::read(path)?;
    let open_quote = contents.iter().filter(|&&b| b == b'"').count() % 2 == 1;
    let tail: &[u8] = match contents.last() {
        _ if open_quote => &b"\"\n"[..],
        Some(b'\n') | None => return Ok(()),
        Some(_) => &b"\n"[..],
    };

    tracing::warn!(path = %path.display(), open_quote, "ledger ends with a truncated row; terminating it");
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(tail)
}

mod date_column {
    use super::DATE_FORMAT;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&date.format(DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}

mod time_column {
    use super::TIME_FORMAT;
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_open_creates_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let ledger = Ledger::open(&path).unwrap();
        assert!(ledger.records().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Name,Date,Time\n");
    }

    #[test]
    fn test_append_then_already_marked() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(&dir.path().join("a.csv")).unwrap();

        assert!(ledger.append("Alice", date(2024, 1, 1), time(9, 0, 0)).unwrap());
        assert!(ledger.already_marked("Alice", date(2024, 1, 1)));
        assert!(!ledger.already_marked("Alice", date(2024, 1, 2)));
        assert!(!ledger.already_marked("Bob", date(2024, 1, 1)));
    }

    #[test]
    fn test_mark_twice_same_day_stores_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut ledger = Ledger::open(&path).unwrap();
        let morning = date(2024, 1, 1).and_hms_opt(9, 0, 0).unwrap();
        let noon = date(2024, 1, 1).and_hms_opt(12, 30, 0).unwrap();

        assert!(matches!(ledger.mark("Alice", morning).unwrap(), MarkOutcome::Recorded(_)));
        assert_eq!(ledger.mark("Alice", noon).unwrap(), MarkOutcome::AlreadyMarked);

        assert_eq!(ledger.records().len(), 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Name,Date,Time\nAlice,2024-01-01,09:00:00\n"
        );
    }

    #[test]
    fn test_next_day_is_a_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(&dir.path().join("a.csv")).unwrap();
        ledger.append("Alice", date(2024, 1, 1), time(9, 0, 0)).unwrap();
        assert!(ledger.append("Alice", date(2024, 1, 2), time(9, 5, 0)).unwrap());
        assert_eq!(ledger.records_on(date(2024, 1, 2)).count(), 1);
        assert_eq!(ledger.records().len(), 2);
    }

    #[test]
    fn test_reopen_hydrates_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append("Bob", date(2024, 3, 4), time(8, 15, 30)).unwrap();
        }
        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.already_marked("Bob", date(2024, 3, 4)));
        assert!(!ledger.append("Bob", date(2024, 3, 4), time(10, 0, 0)).unwrap());
        assert_eq!(
            ledger.records()[0],
            AttendanceRecord {
                name: "Bob".into(),
                date: date(2024, 3, 4),
                time: time(8, 15, 30),
            }
        );
    }

    #[test]
    fn test_truncated_row_is_skipped_and_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "Name,Date,Time\nAlice,2024-01-01,09:00:00\nBob,2024-0").unwrap();

        let mut ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.records().len(), 1);
        assert!(!ledger.already_marked("Bob", date(2024, 1, 1)));

        ledger.append("Carol", date(2024, 1, 1), time(9, 1, 0)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("\nCarol,2024-01-01,09:01:00\n"), "{text}");
    }

    #[test]
    fn test_truncated_quoted_row_does_not_swallow_later_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "Name,Date,Time\nAlice,2024-01-01,09:00:00\n\"Smith, J").unwrap();

        {
            let mut ledger = Ledger::open(&path).unwrap();
            assert_eq!(ledger.records().len(), 1);
            assert!(ledger.append("Carol", date(2024, 1, 1), time(9, 1, 0)).unwrap());
        }

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.already_marked("Carol", date(2024, 1, 1)));
        assert!(!ledger.append("Carol", date(2024, 1, 1), time(9, 2, 0)).unwrap());
        assert!(ledger.append("Smith, J", date(2024, 1, 1), time(9, 3, 0)).unwrap());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Carol,").count(), 1, "{text}");
        assert!(text.ends_with("\"Smith, J\",2024-01-01,09:03:00\n"), "{text}");

        let reopened = Ledger::open(&path).unwrap();
        assert!(reopened.already_marked("Smith, J", date(2024, 1, 1)));
        assert_eq!(reopened.records().len(), 3);
    }

    #[test]
    fn test_read_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let contents = "Name,Date,Time\nAlice,2024-01-01,09:00:00\nBob,2024-01-02,10:00:00";
        std::fs::write(&path, contents).unwrap();

        let ledger = Ledger::read(&path).unwrap();
        assert_eq!(ledger.records().len(), 2);
        assert_eq!(ledger.records_on(date(2024, 1, 2)).count(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
    }

    #[test]
    fn test_read_missing_or_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.csv");
        assert!(Ledger::read(&missing).unwrap().records().is_empty());
        assert!(!missing.exists());

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        assert!(Ledger::read(&empty).unwrap().records().is_empty());
        assert_eq!(std::fs::metadata(&empty).unwrap().len(), 0);
    }

    #[test]
    fn test_wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "who,when\nx,y\n").unwrap();
        assert!(matches!(Ledger::open(&path), Err(LedgerError::BadHeader { .. })));
    }

    #[test]
    fn test_subsecond_time_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut ledger = Ledger::open(&path).unwrap();
        let t = NaiveTime::from_hms_milli_opt(7, 45, 1, 999).unwrap();
        ledger.append("Dana", date(2024, 5, 6), t).unwrap();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("Dana,2024-05-06,07:45:01\n"));
    }
}
