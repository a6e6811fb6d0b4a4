//! ---
//! tsc_section: "03-persistence-logging"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Persistence of the absolute turntable position."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable storage for the turntable's absolute position.

use std::path::PathBuf;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing the log.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for CSV encoding issues.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// The log does not exist or holds no entries.
    #[error("no position recorded in {}", .0.display())]
    NotFound(PathBuf),
    /// The final line of the log could not be decoded.
    #[error("malformed position log line '{line}': {reason}")]
    Malformed {
        /// Offending line, verbatim.
        line: String,
        /// What failed to parse.
        reason: String,
    },
}

impl PersistenceError {
    /// True when the log is simply absent or empty rather than broken.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::NotFound(_))
    }
}

pub mod position_log;

pub use position_log::{PositionLog, PositionLogEntry};
