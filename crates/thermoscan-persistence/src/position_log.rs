//! ---
//! tsc_section: "03-persistence-logging"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Persistence of the absolute turntable position."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use crate::{PersistenceError, Result};

/// Timestamp layout written by older tooling, interpreted as UTC.
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One `(timestamp, position)` row of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionLogEntry {
    /// When the position was recorded.
    pub timestamp: DateTime<Utc>,
    /// Absolute position in degrees.
    pub position: f64,
}

impl PositionLogEntry {
    /// Construct an entry stamped with the current time.
    pub fn now(position: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            position,
        }
    }

    fn from_record(record: &csv::StringRecord, line: &str) -> Result<Self> {
        let malformed = |reason: String| PersistenceError::Malformed {
            line: line.to_owned(),
            reason,
        };
        if record.len() != 2 {
            return Err(malformed(format!("expected 2 fields, found {}", record.len())));
        }
        let timestamp = parse_timestamp(record[0].trim())
            .ok_or_else(|| malformed(format!("unrecognised timestamp '{}'", &record[0])))?;
        let position = record[1]
            .trim()
            .parse::<f64>()
            .map_err(|err| malformed(format!("invalid position: {err}")))?;
        Ok(Self {
            timestamp,
            position,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Append-only CSV log of absolute positions.
///
/// Each append opens the file in append mode, so several handles pointing at
/// the same path never truncate each other.
#[derive(Debug, Clone)]
pub struct PositionLog {
    path: PathBuf,
}

impl PositionLog {
    /// Create a handle for the log at `path`; nothing is touched on disk yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `position` stamped with the current time.
    pub fn append(&self, position: f64) -> Result<PositionLogEntry> {
        let entry = PositionLogEntry::now(position);
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Append a pre-built entry.
    pub fn append_entry(&self, entry: &PositionLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([entry.timestamp.to_rfc3339(), entry.position.to_string()])?;
        writer.flush()?;
        debug!(path = %self.path.display(), position = entry.position, "position appended");
        Ok(())
    }

    /// Decode the final non-empty line of the log.
    pub fn last(&self) -> Result<PositionLogEntry> {
        if !self.path.exists() {
            return Err(PersistenceError::NotFound(self.path.clone()));
        }
        let contents = fs::read_to_string(&self.path)?;
        let Some(line) = contents.lines().rev().find(|line| !line.trim().is_empty()) else {
            return Err(PersistenceError::NotFound(self.path.clone()));
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let record = reader
            .records()
            .next()
            .ok_or_else(|| PersistenceError::NotFound(self.path.clone()))??;
        PositionLogEntry::from_record(&record, line)
    }

    /// Read every entry in append order.
    pub fn entries(&self) -> Result<Vec<PositionLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&self.path)?;
        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record.iter().collect::<Vec<_>>().join(",");
            entries.push(PositionLogEntry::from_record(&record, &line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn last_returns_most_recent_append() {
        let dir = tempdir().unwrap();
        let log = PositionLog::new(dir.path().join("absolute_position.csv"));
        log.append(12.5).unwrap();
        log.append(271.8).unwrap();

        assert_eq!(log.last().unwrap().position, 271.8);
        assert_eq!(log.entries().unwrap().len(), 2);
    }

    #[test]
    fn missing_log_is_not_found() {
        let dir = tempdir().unwrap();
        let log = PositionLog::new(dir.path().join("absent.csv"));
        assert!(log.last().unwrap_err().is_not_found());
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn blank_log_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blank.csv");
        fs::write(&path, "\n\n").unwrap();
        assert!(PositionLog::new(path).last().unwrap_err().is_not_found());
    }

    #[test]
    fn accepts_legacy_timestamp_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        fs::write(&path, "2024-03-01 10:15:00,90.0\n2024-03-01 10:16:30,183.6\n").unwrap();

        let entry = PositionLog::new(path).last().unwrap();
        assert_eq!(entry.position, 183.6);
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-03-01T10:16:30+00:00");
    }

    #[test]
    fn malformed_final_line_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "2024-03-01 10:15:00,90.0\nyesterday,north\n").unwrap();
        let err = PositionLog::new(path).last().unwrap_err();
        assert!(matches!(err, PersistenceError::Malformed { .. }));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let log = PositionLog::new(dir.path().join("nested/state/pos.csv"));
        log.append(1.0).unwrap();
        assert!(log.path().exists());
    }
}
