//! ---
//! tsc_section: "09-telemetry-metrics"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Prometheus counters for motion, frames, and commands."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use thermoscan_common::Direction;

/// Counters published by the rig.
#[derive(Clone)]
pub struct RigMetrics {
    steps: IntCounterVec,
    calibrations: IntCounterVec,
    frames_published: IntCounterVec,
    frame_failures: IntCounterVec,
    commands: IntCounterVec,
    registry: Arc<Registry>,
}

impl RigMetrics {
    /// Register all rig metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<Self> {
        let steps = IntCounterVec::new(
            Opts::new("thermoscan_steps_total", "Motor steps issued, by direction"),
            &["direction"],
        )?;
        registry.register(Box::new(steps.clone()))?;

        let calibrations = IntCounterVec::new(
            Opts::new(
                "thermoscan_calibrations_total",
                "Calibration searches, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(calibrations.clone()))?;

        let frames_published = IntCounterVec::new(
            Opts::new(
                "thermoscan_frames_published_total",
                "Thermal frames acquired and published",
            ),
            &["sensor"],
        )?;
        registry.register(Box::new(frames_published.clone()))?;

        let frame_failures = IntCounterVec::new(
            Opts::new(
                "thermoscan_frame_failures_total",
                "Thermal frame acquisitions that failed and were skipped",
            ),
            &["sensor"],
        )?;
        registry.register(Box::new(frame_failures.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new("thermoscan_commands_total", "Dispatched commands, by outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        Ok(Self {
            steps,
            calibrations,
            frames_published,
            frame_failures,
            commands,
            registry,
        })
    }

    pub fn record_steps(&self, direction: Direction, steps: u64) {
        self.steps
            .with_label_values(&[direction.as_str()])
            .inc_by(steps);
    }

    pub fn record_calibration(&self, outcome: &str) {
        self.calibrations.with_label_values(&[outcome]).inc();
    }

    pub fn record_frame(&self, sensor: &str) {
        self.frames_published.with_label_values(&[sensor]).inc();
    }

    pub fn record_frame_failure(&self, sensor: &str) {
        self.frame_failures.with_label_values(&[sensor]).inc();
    }

    pub fn record_command(&self, command: &str, outcome: &str) {
        self.commands.with_label_values(&[command, outcome]).inc();
    }

    pub fn steps_total(&self, direction: Direction) -> u64 {
        self.steps.with_label_values(&[direction.as_str()]).get()
    }

    pub fn frames_total(&self, sensor: &str) -> u64 {
        self.frames_published.with_label_values(&[sensor]).get()
    }

    pub fn frame_failures_total(&self, sensor: &str) -> u64 {
        self.frame_failures.with_label_values(&[sensor]).get()
    }

    pub fn commands_total(&self, command: &str, outcome: &str) -> u64 {
        self.commands.with_label_values(&[command, outcome]).get()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for RigMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigMetrics").finish_non_exhaustive()
    }
}
