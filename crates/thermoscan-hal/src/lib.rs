//! ---
//! tsc_section: "04-hardware-interfaces"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Hardware collaborator interfaces and simulators."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
//! Interfaces to the rig's hardware collaborators: the stepper driver, the
//! zero-reference switch, and the thermal sensors. Concrete drivers live
//! outside this workspace; [`sim`] provides a simulated turntable that
//! satisfies all three for tests and bench runs.

pub mod sim;

use thermoscan_common::Direction;

pub use sim::{SimulatedHardware, SimulatedSensor, SimulatedStepper, SimulatedSwitch, Turntable};

/// Rows of a thermal frame.
pub const FRAME_ROWS: usize = 24;
/// Columns of a thermal frame.
pub const FRAME_COLS: usize = 32;
/// Samples in a thermal frame.
pub const FRAME_LEN: usize = FRAME_ROWS * FRAME_COLS;

pub type Result<T> = std::result::Result<T, HardwareError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("sensor '{sensor}' read failed: {reason}")]
    SensorRead { sensor: String, reason: String },
    #[error("step failed: {0}")]
    Step(String),
    #[error("hardware initialisation failed: {0}")]
    Init(String),
}

/// One fixed-size grid of temperature samples, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    temperatures: Vec<f32>,
}

impl Frame {
    /// Wrap `temperatures`, which must hold exactly [`FRAME_LEN`] samples.
    pub fn new(temperatures: Vec<f32>) -> Result<Self> {
        if temperatures.len() != FRAME_LEN {
            return Err(HardwareError::SensorRead {
                sensor: "<frame>".to_owned(),
                reason: format!(
                    "expected {} samples, got {}",
                    FRAME_LEN,
                    temperatures.len()
                ),
            });
        }
        Ok(Self { temperatures })
    }

    /// Frame with every sample at `value`.
    pub fn uniform(value: f32) -> Self {
        Self {
            temperatures: vec![value; FRAME_LEN],
        }
    }

    pub fn temperatures(&self) -> &[f32] {
        &self.temperatures
    }

    pub fn into_temperatures(self) -> Vec<f32> {
        self.temperatures
    }

    pub fn at(&self, row: usize, col: usize) -> Option<f32> {
        if row >= FRAME_ROWS || col >= FRAME_COLS {
            return None;
        }
        self.temperatures.get(row * FRAME_COLS + col).copied()
    }
}

/// Advances the motor by one micro-step.
pub trait StepperDriver: Send {
    fn step(&mut self, direction: Direction) -> Result<()>;
    /// De-energize the coils.
    fn release(&mut self);
}

/// Zero-reference limit switch.
pub trait SwitchInput: Send + Sync {
    /// `true` while the zero reference sits under the switch.
    fn read(&self) -> bool;
}

/// A single thermal sensor on the bus.
pub trait ThermalSensor: Send + Sync {
    fn id(&self) -> &str;
    fn address(&self) -> u8;
    fn acquire_frame(&self) -> Result<Frame>;
}

impl<T: StepperDriver + ?Sized> StepperDriver for Box<T> {
    fn step(&mut self, direction: Direction) -> Result<()> {
        (**self).step(direction)
    }

    fn release(&mut self) {
        (**self).release()
    }
}
