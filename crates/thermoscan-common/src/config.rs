//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Shared primitives and utilities for the rig runtime."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::types::StepStyle;

fn default_settle_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_position_log() -> PathBuf {
    PathBuf::from("absolute_position.csv")
}

fn default_telemetry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_stream_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_join_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_sensors() -> IndexMap<String, SensorConfig> {
    [0x30u8, 0x31, 0x32, 0x33]
        .into_iter()
        .enumerate()
        .map(|(idx, address)| (format!("camera{idx}"), SensorConfig { address }))
        .collect()
}

fn default_topic_root() -> String {
    "/thermalcamera".to_owned()
}

fn default_switch_width() -> f64 {
    1.0
}

fn default_ambient() -> f64 {
    22.0
}

fn default_noise_sigma() -> f64 {
    0.3
}

fn default_simulation_seed() -> u64 {
    0x7E57u64
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the rig daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_sensors")]
    pub sensors: IndexMap<String, SensorConfig>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`RigConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedRigConfig {
    pub config: RigConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl RigConfig {
    pub const ENV_CONFIG_PATH: &'static str = "THERMOSCAN_CONFIG";

    /// Load configuration from disk, respecting the `THERMOSCAN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit environment override must exist; plain candidates are
    /// skipped when missing and the defaults apply if none is present.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedRigConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedRigConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedRigConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedRigConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<RigConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Degrees advanced by one call to the step primitive.
    pub fn step_degrees(&self) -> f64 {
        self.motion.step_style.step_degrees()
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.sensors.is_empty() {
            return Err(anyhow!("configuration must declare at least one sensor"));
        }
        let mut seen = HashSet::new();
        for (sensor_id, sensor) in &self.sensors {
            if sensor_id.trim().is_empty() {
                return Err(anyhow!("sensor identifiers must not be empty"));
            }
            if !seen.insert(sensor.address) {
                return Err(anyhow!(
                    "sensor '{}' reuses bus address {:#04x}",
                    sensor_id,
                    sensor.address
                ));
            }
        }
        self.motion.validate()?;
        self.session.validate()?;
        self.simulation.validate(&self.sensors)?;
        Ok(())
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            persistence: PersistenceConfig::default(),
            session: SessionConfig::default(),
            sensors: default_sensors(),
            transport: TransportConfig::default(),
            simulation: SimulationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for RigConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: RigConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default)]
    pub step_style: StepStyle,
    #[serde(default = "default_settle_interval", rename = "settle_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_interval: Duration,
    /// Explicit start-up position; the position log is consulted when unset.
    #[serde(default)]
    pub initial_position: Option<f64>,
}

impl MotionConfig {
    fn validate(&self) -> Result<()> {
        if let Some(position) = self.initial_position {
            if !position.is_finite() || position < 0.0 {
                return Err(anyhow!(
                    "motion.initial_position must be a finite, non-negative angle (got {})",
                    position
                ));
            }
        }
        Ok(())
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            step_style: StepStyle::default(),
            settle_interval: default_settle_interval(),
            initial_position: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_position_log")]
    pub position_log: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            position_log: default_position_log(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_telemetry_interval", rename = "telemetry_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub telemetry_interval: Duration,
    #[serde(default = "default_stream_interval", rename = "stream_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stream_interval: Duration,
    #[serde(default = "default_join_timeout", rename = "join_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub join_timeout: Duration,
    #[serde(default = "default_true")]
    pub telemetry_on_start: bool,
    #[serde(default)]
    pub stream_on_start: bool,
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("telemetry_interval_ms", self.telemetry_interval),
            ("stream_interval_ms", self.stream_interval),
            ("join_timeout_ms", self.join_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("session.{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            telemetry_interval: default_telemetry_interval(),
            stream_interval: default_stream_interval(),
            join_timeout: default_join_timeout(),
            telemetry_on_start: true,
            stream_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorConfig {
    /// I2C bus address of the sensor.
    pub address: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_topic_root")]
    pub topic_root: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            topic_root: default_topic_root(),
        }
    }
}

/// Parameters of the simulated turntable and sensors used off-target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// True mechanical angle of the zero-reference switch.
    #[serde(default)]
    pub switch_position: f64,
    /// Arc, in degrees, over which the switch reads closed.
    #[serde(default = "default_switch_width")]
    pub switch_width: f64,
    /// Where the turntable physically sits when the daemon starts.
    #[serde(default)]
    pub start_angle: f64,
    #[serde(default = "default_ambient")]
    pub ambient: f64,
    #[serde(default = "default_noise_sigma")]
    pub noise_sigma: f64,
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
    /// Sensors that fail every read, for exercising partial sweeps.
    #[serde(default)]
    pub failing_sensors: Vec<String>,
}

impl SimulationConfig {
    fn validate(&self, sensors: &IndexMap<String, SensorConfig>) -> Result<()> {
        if !(self.switch_width > 0.0) {
            return Err(anyhow!("simulation.switch_width must be positive"));
        }
        if !(self.noise_sigma >= 0.0) {
            return Err(anyhow!("simulation.noise_sigma must not be negative"));
        }
        if let Some(unknown) = self
            .failing_sensors
            .iter()
            .find(|id| !sensors.contains_key(id.as_str()))
        {
            return Err(anyhow!(
                "simulation.failing_sensors references unknown sensor '{}'",
                unknown
            ));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            switch_position: 0.0,
            switch_width: default_switch_width(),
            start_angle: 0.0,
            ambient: default_ambient(),
            noise_sigma: default_noise_sigma(),
            seed: default_simulation_seed(),
            failing_sensors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
