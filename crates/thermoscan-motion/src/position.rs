//! ---
//! tsc_section: "05-motion-control"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Position tracking and stepper motion control."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use parking_lot::Mutex;
use serde::Serialize;
use thermoscan_persistence::{PersistenceError, PositionLog, PositionLogEntry};
use tracing::{info, warn};

/// Fold any finite angle into `[0, 360)`.
pub fn normalize_degrees(value: f64) -> f64 {
    let folded = value.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}

/// How the start-up position was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", content = "position", rename_all = "snake_case")]
pub enum InitialPosition {
    Explicit(f64),
    Restored(f64),
    Defaulted(f64),
}

impl InitialPosition {
    pub fn degrees(self) -> f64 {
        match self {
            InitialPosition::Explicit(value)
            | InitialPosition::Restored(value)
            | InitialPosition::Defaulted(value) => value,
        }
    }
}

/// Single owner of the absolute turntable position and its durable log.
///
/// Every read and write goes through one lock, so concurrent readers always
/// observe a value that some writer stored in full.
#[derive(Debug)]
pub struct PositionStore {
    degrees: Mutex<f64>,
    log: PositionLog,
}

impl PositionStore {
    pub fn new(initial: f64, log: PositionLog) -> Self {
        let store = Self {
            degrees: Mutex::new(0.0),
            log,
        };
        store.set(initial);
        store
    }

    pub fn get(&self) -> f64 {
        *self.degrees.lock()
    }

    /// Store `value` folded into `[0, 360)` and return what was stored.
    ///
    /// Non-finite input leaves the position untouched.
    pub fn set(&self, value: f64) -> f64 {
        let mut degrees = self.degrees.lock();
        if !value.is_finite() {
            warn!(value, kept = *degrees, "ignoring non-finite position");
            return *degrees;
        }
        *degrees = normalize_degrees(value);
        *degrees
    }

    /// Shift the position by `delta` degrees under a single lock acquisition.
    pub fn offset(&self, delta: f64) -> f64 {
        let mut degrees = self.degrees.lock();
        *degrees = normalize_degrees(*degrees + delta);
        *degrees
    }

    /// Append the current position to the log.
    pub fn persist(&self) -> Result<PositionLogEntry, PersistenceError> {
        let entry = self.log.append(self.get())?;
        info!(position = entry.position, path = %self.log.path().display(), "absolute position exported");
        Ok(entry)
    }

    /// Load the last logged position.
    pub fn restore(&self) -> Result<f64, PersistenceError> {
        let entry = self.log.last()?;
        let position = self.set(entry.position);
        info!(position, recorded_at = %entry.timestamp, "absolute position imported");
        Ok(position)
    }

    /// Establish the start-up position: explicit value, else the log, else 0.
    ///
    /// An absent or unreadable log is never fatal here.
    pub fn initialize(&self, explicit: Option<f64>) -> InitialPosition {
        if let Some(value) = explicit {
            return InitialPosition::Explicit(self.set(value));
        }
        match self.restore() {
            Ok(position) => InitialPosition::Restored(position),
            Err(err) => {
                if err.is_not_found() {
                    warn!(path = %self.log.path().display(), "no absolute position given and no position log found; assuming 0");
                } else {
                    warn!(path = %self.log.path().display(), error = %err, "position log unreadable; assuming 0");
                }
                InitialPosition::Defaulted(self.set(0.0))
            }
        }
    }

    pub fn log(&self) -> &PositionLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> PositionStore {
        PositionStore::new(0.0, PositionLog::new(dir.path().join("absolute_position.csv")))
    }

    #[test]
    fn set_folds_into_canonical_range() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.set(360.0), 0.0);
        assert_eq!(store.set(725.5), 5.5);
        assert_eq!(store.set(-90.0), 270.0);
        assert_eq!(store.set(-1e-17), 0.0);
        assert_eq!(store.get(), 0.0);
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.set(42.0);
        assert_eq!(store.set(f64::NAN), 42.0);
        assert_eq!(store.set(f64::INFINITY), 42.0);
    }

    #[test]
    fn offset_wraps_both_ways() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.set(359.5);
        assert!((store.offset(0.9) - 0.4).abs() < 1e-9);
        assert!((store.offset(-0.9) - 359.5).abs() < 1e-9);
    }

    #[test]
    fn initialize_prefers_explicit_then_log_then_zero() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.initialize(None), InitialPosition::Defaulted(0.0));

        store.set(123.0);
        store.persist().unwrap();
        store.set(5.0);
        assert_eq!(store.initialize(None), InitialPosition::Restored(123.0));
        assert_eq!(store.initialize(Some(400.0)), InitialPosition::Explicit(40.0));
        assert_eq!(store.get(), 40.0);
    }

    #[test]
    fn restore_without_log_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.set(17.0);
        assert!(store.restore().unwrap_err().is_not_found());
        assert_eq!(store.get(), 17.0);
    }
}
