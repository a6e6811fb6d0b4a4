//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Session lifecycle and command dispatch."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::Registry;
use serde::Serialize;
use thermoscan_common::RigConfig;
use thermoscan_hal::{SimulatedHardware, StepperDriver, SwitchInput, ThermalSensor};
use thermoscan_motion::{
    CalibrationReport, InitialPosition, MotionController, MotionError, MoveReport, PositionStore,
};
use thermoscan_msg::{Publisher, Topics};
use thermoscan_persistence::{PositionLog, PositionLogEntry};
use tracing::{info, warn};

use crate::error::CommandError;
use crate::frames::FramePublisher;
use crate::metrics::RigMetrics;

/// Hardware collaborators handed to [`Rig::new`].
pub struct RigHardware {
    pub stepper: Box<dyn StepperDriver>,
    pub switch: Arc<dyn SwitchInput>,
    pub sensors: Vec<Arc<dyn ThermalSensor>>,
}

impl From<SimulatedHardware> for RigHardware {
    fn from(hardware: SimulatedHardware) -> Self {
        Self {
            stepper: Box::new(hardware.stepper),
            switch: Arc::new(hardware.switch),
            sensors: hardware.sensors,
        }
    }
}

/// Retained state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RigState {
    pub running: bool,
    pub position: f64,
    pub switch_state: bool,
    pub streaming: bool,
}

/// Everything the dispatcher and session loops share: the motion controller,
/// the sensors, the outbound publisher, and the metrics registry.
pub struct Rig {
    config: RigConfig,
    controller: Arc<MotionController>,
    frames: Arc<FramePublisher>,
    publisher: Arc<Publisher>,
    metrics: Arc<RigMetrics>,
    initial_position: InitialPosition,
}

impl Rig {
    pub fn new(config: RigConfig, hardware: RigHardware, publisher: Publisher) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(
            RigMetrics::new(registry).context("failed to register rig metrics")?,
        );
        let store = Arc::new(PositionStore::new(
            0.0,
            PositionLog::new(config.persistence.position_log.clone()),
        ));
        let initial_position = store.initialize(config.motion.initial_position);
        let publisher = Arc::new(publisher);
        let controller = Arc::new(MotionController::new(
            hardware.stepper,
            hardware.switch,
            store.clone(),
            config.step_degrees(),
            config.motion.settle_interval,
        ));
        let frames = Arc::new(FramePublisher::new(
            hardware.sensors,
            store,
            publisher.clone(),
            metrics.clone(),
        ));
        info!(
            initial = ?initial_position,
            step_degrees = config.step_degrees(),
            sensors = config.sensors.len(),
            "rig assembled"
        );
        Ok(Self {
            config,
            controller,
            frames,
            publisher,
            metrics,
            initial_position,
        })
    }

    /// Build a rig on top of the simulated turntable described by `config`.
    pub fn simulated(config: RigConfig, publisher: Publisher) -> Result<Self> {
        let hardware =
            SimulatedHardware::from_config(&config).context("failed to initialise simulated hardware")?;
        Self::new(config, hardware.into(), publisher)
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<MotionController> {
        &self.controller
    }

    pub fn position(&self) -> &Arc<PositionStore> {
        self.controller.position_store()
    }

    pub fn frames(&self) -> &Arc<FramePublisher> {
        &self.frames
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn topics(&self) -> &Topics {
        self.publisher.topics()
    }

    pub fn metrics(&self) -> &Arc<RigMetrics> {
        &self.metrics
    }

    pub fn initial_position(&self) -> InitialPosition {
        self.initial_position
    }

    /// Run a blocking motion call on the blocking pool.
    pub async fn run_motion<T, F>(&self, op: F) -> std::result::Result<T, CommandError>
    where
        F: FnOnce(&MotionController) -> std::result::Result<T, MotionError> + Send + 'static,
        T: Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let outcome = tokio::task::spawn_blocking(move || op(&controller)).await?;
        outcome.map_err(CommandError::from)
    }

    pub fn record_move(&self, report: &MoveReport) {
        self.metrics.record_steps(report.direction, report.steps);
    }

    pub fn record_calibration(&self, outcome: &std::result::Result<CalibrationReport, CommandError>) {
        match outcome {
            Ok(report) => {
                self.metrics.record_steps(report.direction, report.steps);
                self.metrics.record_calibration("found");
            }
            Err(CommandError::Motion(MotionError::CalibrationNotFound { .. })) => {
                self.metrics.record_calibration("not_found");
            }
            Err(_) => self.metrics.record_calibration("failed"),
        }
    }

    /// Append the current position to the log; failures are logged, not raised.
    pub fn checkpoint(&self) -> Option<PositionLogEntry> {
        match self.position().persist() {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "position checkpoint failed");
                None
            }
        }
    }

    pub fn state(&self, running: bool, streaming: bool) -> RigState {
        RigState {
            running,
            position: self.position().get(),
            switch_state: self.controller.switch_state(),
            streaming,
        }
    }
}

impl std::fmt::Debug for Rig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rig")
            .field("controller", &self.controller)
            .field("frames", &self.frames)
            .field("initial_position", &self.initial_position)
            .finish_non_exhaustive()
    }
}
