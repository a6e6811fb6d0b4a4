//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Shared primitives and utilities for the rig runtime."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Rotation direction of the turntable.
///
/// Wire literals are `fw` and `bw`; `forward` and `backward` are accepted
/// as long-form spellings of the same two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "fw", alias = "forward")]
    Forward,
    #[serde(rename = "bw", alias = "backward")]
    Backward,
}

impl Direction {
    /// Multiplier applied to a step increment travelling in this direction.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "fw",
            Direction::Backward => "bw",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a direction literal is neither `fw` nor `bw`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("direction must be either 'fw' or 'bw', got '{0}'")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fw" | "forward" => Ok(Direction::Forward),
            "bw" | "backward" => Ok(Direction::Backward),
            _ => Err(ParseDirectionError(s.to_owned())),
        }
    }
}

/// Coil drive pattern of the stepper, which fixes the angle of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStyle {
    Single,
    Double,
    #[default]
    Interleave,
    Microstep,
}

impl StepStyle {
    /// Full-step angle of the 200 steps/rev motor.
    pub const FULL_STEP_DEGREES: f64 = 1.8;
    pub const MICROSTEPS: u32 = 16;

    /// Mechanical degrees advanced by a single call to the step primitive.
    pub fn step_degrees(self) -> f64 {
        match self {
            StepStyle::Single | StepStyle::Double => Self::FULL_STEP_DEGREES,
            StepStyle::Interleave => Self::FULL_STEP_DEGREES / 2.0,
            StepStyle::Microstep => Self::FULL_STEP_DEGREES / f64::from(Self::MICROSTEPS),
        }
    }
}
