//! ---
//! tsc_section: "05-motion-control"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Position tracking and stepper motion control."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
//! Absolute-position bookkeeping and the stepper motion controller.

mod controller;
mod position;

pub use controller::{
    CalibrationReport, MotionController, MotionState, MoveReport, MAX_TRAVEL_DEGREES,
};
pub use position::{normalize_degrees, InitialPosition, PositionStore};

use thermoscan_hal::HardwareError;
use thermoscan_persistence::PersistenceError;

pub type Result<T> = std::result::Result<T, MotionError>;

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("motor busy: another motion is in progress")]
    Busy,
    #[error("zero reference not found within {max_search_angle} degrees ({steps} steps); position left at {position}")]
    CalibrationNotFound {
        max_search_angle: f64,
        steps: u64,
        position: f64,
    },
    #[error("step {} of {requested} failed: {source}", .completed + 1)]
    Hardware {
        completed: u64,
        requested: u64,
        #[source]
        source: HardwareError,
    },
    #[error("angle {0} is not finite or exceeds {max} degrees", max = MAX_TRAVEL_DEGREES)]
    InvalidAngle(f64),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
