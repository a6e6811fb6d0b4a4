//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Session lifecycle and command dispatch."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use thermoscan_common::Direction;
use thermoscan_msg::CommandEnvelope;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::params::{extract, ParamKind, ParamSpec, Params};
use crate::rig::Rig;
use crate::session::{LoopKind, ScanParams, SessionManager};

/// Every command the rig understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetFrame,
    GetFrames,
    GetSwitchState,
    Rotate,
    GoTo,
    Calibrate,
    SetAbsolutePosition,
    ExportAbsolutePosition,
    ImportAbsolutePosition,
    Init,
    Release,
    Run,
    Stop,
    StartStream,
    StopStream,
    StartTelemetry,
    StopTelemetry,
    Metrics,
}

impl Command {
    pub const ALL: [Command; 18] = [
        Command::GetFrame,
        Command::GetFrames,
        Command::GetSwitchState,
        Command::Rotate,
        Command::GoTo,
        Command::Calibrate,
        Command::SetAbsolutePosition,
        Command::ExportAbsolutePosition,
        Command::ImportAbsolutePosition,
        Command::Init,
        Command::Release,
        Command::Run,
        Command::Stop,
        Command::StartStream,
        Command::StopStream,
        Command::StartTelemetry,
        Command::StopTelemetry,
        Command::Metrics,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::GetFrame => "get_frame",
            Command::GetFrames => "get_frames",
            Command::GetSwitchState => "get_switch_state",
            Command::Rotate => "rotate",
            Command::GoTo => "go_to",
            Command::Calibrate => "calibrate",
            Command::SetAbsolutePosition => "set_absolute_position",
            Command::ExportAbsolutePosition => "export_absolute_position",
            Command::ImportAbsolutePosition => "import_absolute_position",
            Command::Init => "init",
            Command::Release => "release",
            Command::Run => "run",
            Command::Stop => "stop",
            Command::StartStream => "start_stream",
            Command::StopStream => "stop_stream",
            Command::StartTelemetry => "start_telemetry",
            Command::StopTelemetry => "stop_telemetry",
            Command::Metrics => "metrics",
        }
    }

    /// Declared parameters, in payload-binding order.
    pub fn params(self) -> Vec<ParamSpec> {
        match self {
            Command::GetFrame => {
                vec![ParamSpec::required("camera", ParamKind::Text).alias(&["sensor"])]
            }
            Command::Rotate => vec![
                ParamSpec::required("angle", ParamKind::Float),
                ParamSpec::direction("direction", Direction::Forward),
            ],
            Command::GoTo => {
                vec![ParamSpec::required("target", ParamKind::Float).alias(&["position"])]
            }
            Command::Calibrate => vec![
                ParamSpec::float("max_search_angle", 180.0).alias(&["prudence"]),
                ParamSpec::direction("direction", Direction::Backward),
            ],
            Command::SetAbsolutePosition => {
                vec![ParamSpec::required("value", ParamKind::Float).alias(&["position"])]
            }
            Command::Init => vec![ParamSpec::optional("absolute_position", ParamKind::Float)],
            Command::Run => {
                let defaults = ScanParams::default();
                vec![
                    ParamSpec::float("offset", defaults.offset),
                    ParamSpec::float("step", defaults.step),
                    ParamSpec::float("wait", defaults.wait.as_secs_f64()),
                    ParamSpec::direction("direction", defaults.direction),
                    ParamSpec::boolean("continuous", defaults.continuous),
                    ParamSpec::boolean("calibrate", defaults.calibrate),
                    ParamSpec::float("prudence", defaults.prudence),
                ]
            }
            Command::StartStream | Command::StartTelemetry => {
                vec![ParamSpec::optional("interval", ParamKind::Float)]
            }
            Command::GetFrames
            | Command::GetSwitchState
            | Command::ExportAbsolutePosition
            | Command::ImportAbsolutePosition
            | Command::Release
            | Command::Stop
            | Command::StopStream
            | Command::StopTelemetry
            | Command::Metrics => Vec::new(),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.name() == name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_owned()))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Routes inbound commands to the motion controller, the position store,
/// and the session manager, one command at a time.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    rig: Arc<Rig>,
    sessions: SessionManager,
}

impl Dispatcher {
    pub fn new(rig: Arc<Rig>) -> Self {
        let sessions = SessionManager::new(Arc::clone(&rig), rig.config().session.clone());
        Self { rig, sessions }
    }

    pub fn rig(&self) -> &Arc<Rig> {
        &self.rig
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start the loops the configuration enables at start-up.
    pub async fn start_configured_loops(&self) -> Result<(), CommandError> {
        let session = &self.rig.config().session;
        if session.telemetry_on_start {
            self.sessions.start_telemetry(None).await?;
        }
        if session.stream_on_start {
            self.sessions.start_stream(None).await?;
        }
        Ok(())
    }

    /// Execute one command and publish its response.
    pub async fn dispatch(&self, envelope: &CommandEnvelope) -> Result<JsonValue, CommandError> {
        let name = envelope.command.as_str();
        let outcome = self.execute(envelope).await;
        let (label, response) = match &outcome {
            Ok(result) => ("ok", json!({ "ok": true, "command": name, "result": result })),
            Err(err) => (
                err.kind(),
                json!({ "ok": false, "command": name, "error": err.to_string(), "kind": err.kind() }),
            ),
        };
        let metric_name = if Command::from_str(name).is_ok() {
            name
        } else {
            "unknown"
        };
        self.rig.metrics().record_command(metric_name, label);
        match &outcome {
            Ok(_) => info!(command = name, "command completed"),
            Err(err) => warn!(command = name, kind = err.kind(), error = %err, "command failed"),
        }
        let topic = self.rig.topics().response(name);
        if let Err(err) = self.rig.publisher().publish(&topic, &response, false) {
            warn!(command = name, error = %err, "failed to publish command response");
        }
        outcome
    }

    async fn execute(&self, envelope: &CommandEnvelope) -> Result<JsonValue, CommandError> {
        let command = Command::from_str(&envelope.command)?;
        let params = extract(command.name(), &command.params(), &envelope.payload)?;
        debug!(%command, ?params, "dispatching command");
        match command {
            Command::GetFrame => self.get_frame(&params).await,
            Command::GetFrames => self.get_frames().await,
            Command::GetSwitchState => self.get_switch_state(),
            Command::Rotate => {
                let angle = params.require_float("angle")?;
                let direction = params.require_direction("direction")?;
                let report = self
                    .rig
                    .run_motion(move |controller| controller.rotate_relative(angle, direction))
                    .await?;
                self.rig.record_move(&report);
                self.sessions.publish_state();
                to_json(&report)
            }
            Command::GoTo => {
                let target = params.require_float("target")?;
                let report = self
                    .rig
                    .run_motion(move |controller| controller.go_to(target))
                    .await?;
                self.rig.record_move(&report);
                self.sessions.publish_state();
                to_json(&report)
            }
            Command::Calibrate => {
                let max_search_angle = params.require_float("max_search_angle")?;
                let direction = params.require_direction("direction")?;
                let outcome = self
                    .rig
                    .run_motion(move |controller| controller.calibrate(max_search_angle, direction))
                    .await;
                self.rig.record_calibration(&outcome);
                self.sessions.publish_state();
                let report = outcome?;
                Ok(json!({ "steps": report.steps, "direction": report.direction, "position": self.rig.position().get() }))
            }
            Command::SetAbsolutePosition => {
                let position = self.rig.position().set(params.require_float("value")?);
                self.sessions.publish_state();
                Ok(json!({ "position": position }))
            }
            Command::ExportAbsolutePosition => {
                let entry = self.rig.position().persist()?;
                Ok(json!({ "position": entry.position, "timestamp": entry.timestamp }))
            }
            Command::ImportAbsolutePosition => {
                let position = self.rig.position().restore()?;
                self.sessions.publish_state();
                Ok(json!({ "position": position }))
            }
            Command::Init => {
                let initial = self
                    .rig
                    .position()
                    .initialize(params.float("absolute_position"));
                self.sessions.publish_state();
                to_json(&initial)
            }
            Command::Release => {
                self.rig
                    .run_motion(|controller| {
                        controller.release();
                        Ok(())
                    })
                    .await?;
                Ok(json!({ "released": true }))
            }
            Command::Run => {
                let scan = scan_params(&params)?;
                self.sessions.start_scan(scan).await?;
                Ok(json!({ "state": self.sessions.state(LoopKind::Scan) }))
            }
            Command::Stop => Ok(json!({ "state": self.sessions.stop(LoopKind::Scan).await })),
            Command::StartStream => {
                let interval = interval(&params)?;
                self.sessions.start_stream(interval).await?;
                Ok(json!({ "state": self.sessions.state(LoopKind::Stream) }))
            }
            Command::StopStream => {
                Ok(json!({ "state": self.sessions.stop(LoopKind::Stream).await }))
            }
            Command::StartTelemetry => {
                let interval = interval(&params)?;
                self.sessions.start_telemetry(interval).await?;
                Ok(json!({ "state": self.sessions.state(LoopKind::Telemetry) }))
            }
            Command::StopTelemetry => {
                Ok(json!({ "state": self.sessions.stop(LoopKind::Telemetry).await }))
            }
            Command::Metrics => {
                let exposition = self.rig.metrics().encode()?;
                let topic = self.rig.topics().metrics();
                self.rig.publisher().publish(&topic, &exposition, false)?;
                Ok(json!({ "bytes": exposition.len() }))
            }
        }
    }

    async fn get_frame(&self, params: &Params) -> Result<JsonValue, CommandError> {
        let camera = params.require_text("camera")?;
        let sensor = self
            .rig
            .frames()
            .sensor(camera)
            .cloned()
            .ok_or_else(|| CommandError::UnknownSensor(camera.to_owned()))?;
        let frames = Arc::clone(self.rig.frames());
        let payload =
            tokio::task::spawn_blocking(move || frames.publish_sensor(sensor.as_ref())).await??;
        Ok(json!({
            "sensor": payload.sensor,
            "address": payload.address,
            "position": payload.position,
            "stats": payload.stats,
        }))
    }

    async fn get_frames(&self) -> Result<JsonValue, CommandError> {
        let frames = Arc::clone(self.rig.frames());
        let summary = tokio::task::spawn_blocking(move || frames.publish_all()).await?;
        Ok(json!({ "published": summary.published, "failed": summary.failed }))
    }

    fn get_switch_state(&self) -> Result<JsonValue, CommandError> {
        let closed = self.rig.controller().switch_state();
        self.rig
            .publisher()
            .publish(&self.rig.topics().switch(), &closed, false)?;
        Ok(json!({ "switch_state": closed }))
    }

    /// Consume commands until the channel closes, then shut down.
    pub async fn run(&self, mut commands: mpsc::Receiver<CommandEnvelope>) {
        while let Some(envelope) = commands.recv().await {
            // Failures are already logged and published as responses.
            let _ = self.dispatch(&envelope).await;
        }
        info!("command channel closed");
        self.shutdown().await;
    }

    /// Stop every loop and checkpoint the position.
    pub async fn shutdown(&self) {
        self.sessions.stop_all().await;
        if let Some(entry) = self.rig.checkpoint() {
            info!(position = entry.position, "position checkpointed on shutdown");
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, CommandError> {
    serde_json::to_value(value).map_err(|err| CommandError::Messaging(err.into()))
}

fn scan_params(params: &Params) -> Result<ScanParams, CommandError> {
    let step = params.require_float("step")?;
    if step <= 0.0 {
        return Err(CommandError::Validation(format!(
            "'step' must be a positive angle, got {step}"
        )));
    }
    let prudence = params.require_float("prudence")?;
    if prudence < 0.0 {
        return Err(CommandError::Validation(format!(
            "'prudence' must not be negative, got {prudence}"
        )));
    }
    Ok(ScanParams {
        offset: params.require_float("offset")?,
        step,
        wait: seconds("wait", params.require_float("wait")?)?,
        direction: params.require_direction("direction")?,
        continuous: params.require_bool("continuous")?,
        calibrate: params.require_bool("calibrate")?,
        prudence,
    })
}

fn interval(params: &Params) -> Result<Option<Duration>, CommandError> {
    match params.float("interval") {
        None => Ok(None),
        Some(value) => {
            let interval = seconds("interval", value)?;
            if interval.is_zero() {
                return Err(CommandError::Validation(
                    "'interval' must be greater than zero".to_owned(),
                ));
            }
            Ok(Some(interval))
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, CommandError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        CommandError::Validation(format!(
            "'{name}' must be a non-negative number of seconds, got {value}"
        ))
    })
}
