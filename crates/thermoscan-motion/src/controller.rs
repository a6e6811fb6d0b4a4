//! ---
//! tsc_section: "05-motion-control"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Position tracking and stepper motion control."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thermoscan_common::Direction;
use thermoscan_hal::{StepperDriver, SwitchInput};
use tracing::{debug, info, warn};

use crate::position::PositionStore;
use crate::{MotionError, Result};

/// Longest single move or calibration search accepted, in degrees.
pub const MAX_TRAVEL_DEGREES: f64 = 100.0 * 360.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    Idle,
    Stepping,
}

/// Outcome of a completed relative or absolute move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoveReport {
    pub steps: u64,
    pub direction: Direction,
    /// Steps after which the switch read closed.
    pub switch_hits: u64,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationReport {
    /// Steps taken before the switch closed.
    pub steps: u64,
    pub direction: Direction,
}

/// Turns angle requests into single steps while keeping the position store in sync.
///
/// The motor lock is held for an entire call; a request arriving while
/// another call holds it is rejected with [`MotionError::Busy`].
pub struct MotionController {
    motor: Mutex<Box<dyn StepperDriver>>,
    switch: Arc<dyn SwitchInput>,
    position: Arc<PositionStore>,
    step_degrees: f64,
    settle: Duration,
}

impl MotionController {
    pub fn new(
        motor: Box<dyn StepperDriver>,
        switch: Arc<dyn SwitchInput>,
        position: Arc<PositionStore>,
        step_degrees: f64,
        settle: Duration,
    ) -> Self {
        Self {
            motor: Mutex::new(motor),
            switch,
            position,
            step_degrees,
            settle,
        }
    }

    pub fn step_degrees(&self) -> f64 {
        self.step_degrees
    }

    pub fn position(&self) -> f64 {
        self.position.get()
    }

    pub fn position_store(&self) -> &Arc<PositionStore> {
        &self.position
    }

    pub fn switch_state(&self) -> bool {
        self.switch.read()
    }

    pub fn state(&self) -> MotionState {
        if self.motor.is_locked() {
            MotionState::Stepping
        } else {
            MotionState::Idle
        }
    }

    /// Number of steps a move of `angle` degrees resolves to.
    pub fn steps_for(&self, angle: f64) -> u64 {
        (angle.abs() / self.step_degrees).round() as u64
    }

    /// Step count for `angle`, rejecting non-finite angles and moves longer
    /// than [`MAX_TRAVEL_DEGREES`].
    fn checked_steps(&self, angle: f64) -> Result<u64> {
        if !angle.is_finite() || angle.abs() > MAX_TRAVEL_DEGREES {
            return Err(MotionError::InvalidAngle(angle));
        }
        Ok(self.steps_for(angle))
    }

    /// Rotate by `angle` degrees (sign ignored) in `direction`.
    pub fn rotate_relative(&self, angle: f64, direction: Direction) -> Result<MoveReport> {
        let requested = self.checked_steps(angle)?;
        let mut motor = self.motor.try_lock().ok_or(MotionError::Busy)?;
        let report = self.step_locked(motor.as_mut(), requested, direction)?;
        info!(angle, %direction, steps = report.steps, position = report.position, "stepper motor rotated");
        Ok(report)
    }

    /// Move to `target` degrees along `target - current`, without wrapping.
    ///
    /// A move from 350 to 10 therefore travels 340 degrees backward. The
    /// current position is read under the motor lock.
    pub fn go_to(&self, target: f64) -> Result<MoveReport> {
        if !target.is_finite() {
            return Err(MotionError::InvalidAngle(target));
        }
        let mut motor = self.motor.try_lock().ok_or(MotionError::Busy)?;
        let delta = target - self.position.get();
        let direction = if delta >= 0.0 {
            Direction::Forward
        } else {
            Direction::Backward
        };
        let requested = self.checked_steps(delta)?;
        let report = self.step_locked(motor.as_mut(), requested, direction)?;
        debug!(target, steps = report.steps, position = report.position, "go-to complete");
        Ok(report)
    }

    fn step_locked(
        &self,
        motor: &mut dyn StepperDriver,
        requested: u64,
        direction: Direction,
    ) -> Result<MoveReport> {
        let delta = direction.sign() * self.step_degrees;
        let mut switch_hits = 0u64;
        for completed in 0..requested {
            motor
                .step(direction)
                .map_err(|source| MotionError::Hardware {
                    completed,
                    requested,
                    source,
                })?;
            let position = self.position.offset(delta);
            if self.switch.read() {
                switch_hits += 1;
                warn!(position, "zero-reference switch closed during rotation");
            }
            self.settle();
        }
        Ok(MoveReport {
            steps: requested,
            direction,
            switch_hits,
            position: self.position.get(),
        })
    }

    /// Step toward the switch for at most `max_search_angle` degrees.
    ///
    /// On success the position becomes exactly 0. When the budget runs out
    /// the position stays wherever the search ended.
    pub fn calibrate(&self, max_search_angle: f64, direction: Direction) -> Result<CalibrationReport> {
        let budget = self.checked_steps(max_search_angle)?;
        let mut motor = self.motor.try_lock().ok_or(MotionError::Busy)?;
        let delta = direction.sign() * self.step_degrees;
        info!(max_search_angle, %direction, budget, "starting calibration");
        let mut steps = 0u64;
        loop {
            if self.switch.read() {
                self.position.set(0.0);
                info!(steps, "zero reference found; absolute position set to 0");
                return Ok(CalibrationReport { steps, direction });
            }
            if steps >= budget {
                let position = self.position.get();
                warn!(max_search_angle, steps, position, "zero reference not found within search angle");
                return Err(MotionError::CalibrationNotFound {
                    max_search_angle,
                    steps,
                    position,
                });
            }
            motor
                .step(direction)
                .map_err(|source| MotionError::Hardware {
                    completed: steps,
                    requested: budget,
                    source,
                })?;
            self.position.offset(delta);
            steps += 1;
            self.settle();
        }
    }

    /// De-energize the coils, waiting for any in-flight move to finish.
    pub fn release(&self) {
        self.motor.lock().release();
        info!("stepper motor released");
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }
}

impl std::fmt::Debug for MotionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("step_degrees", &self.step_degrees)
            .field("settle", &self.settle)
            .field("position", &self.position.get())
            .finish_non_exhaustive()
    }
}
