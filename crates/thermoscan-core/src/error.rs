//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Session lifecycle and command dispatch."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use thermoscan_hal::HardwareError;
use thermoscan_motion::MotionError;
use thermoscan_msg::MessagingError;
use thermoscan_persistence::PersistenceError;

use crate::session::SessionError;

/// Why a command did not complete.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid parameters: {0}")]
    Validation(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("motor busy: another motion is in progress")]
    Busy,
    #[error(transparent)]
    Motion(MotionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl CommandError {
    /// Short label used for metrics and response payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "validation",
            CommandError::UnknownCommand(_) => "unknown_command",
            CommandError::Busy => "busy",
            CommandError::Motion(MotionError::CalibrationNotFound { .. }) => "calibration_not_found",
            CommandError::Motion(_) => "motion",
            CommandError::Persistence(err) if err.is_not_found() => "not_found",
            CommandError::Persistence(_) => "persistence",
            CommandError::Session(_) => "session",
            CommandError::Hardware(_) => "hardware",
            CommandError::UnknownSensor(_) => "unknown_sensor",
            CommandError::Messaging(_) => "messaging",
            CommandError::Metrics(_) => "metrics",
            CommandError::Worker(_) => "worker",
        }
    }
}

impl From<MotionError> for CommandError {
    fn from(err: MotionError) -> Self {
        match err {
            MotionError::Busy => CommandError::Busy,
            MotionError::Persistence(inner) => CommandError::Persistence(inner),
            other => CommandError::Motion(other),
        }
    }
}

impl From<tokio::task::JoinError> for CommandError {
    fn from(err: tokio::task::JoinError) -> Self {
        CommandError::Worker(err.to_string())
    }
}
