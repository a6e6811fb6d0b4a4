//! ---
//! tsc_section: "11-simulation-test-harness"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Simulated turntable, switch, and thermal sensors."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use thermoscan_common::{Direction, RigConfig};
use tracing::debug;

use crate::{
    Frame, HardwareError, Result, StepperDriver, SwitchInput, ThermalSensor, FRAME_COLS,
    FRAME_LEN, FRAME_ROWS,
};

/// Horizontal field of view of one simulated sensor, degrees.
const SENSOR_FOV: f64 = 55.0;
/// Bearing of the warm object the simulated sensors look at.
const HOTSPOT_BEARING: f64 = 90.0;
const HOTSPOT_DELTA: f64 = 15.0;
const HOTSPOT_SPREAD: f64 = 6.0;

#[derive(Debug)]
struct TurntableState {
    /// Signed micro-steps from mechanical zero; never wrapped, so no drift.
    steps: i64,
    step_degrees: f64,
    switch_position: f64,
    switch_width: f64,
    energized: bool,
    step_calls: u64,
}

impl TurntableState {
    fn angle(&self) -> f64 {
        (self.steps as f64 * self.step_degrees).rem_euclid(360.0)
    }
}

/// Ground-truth mechanical state shared by the simulated stepper, switch, and sensors.
#[derive(Debug, Clone)]
pub struct Turntable {
    inner: Arc<Mutex<TurntableState>>,
}

impl Turntable {
    pub fn new(step_degrees: f64, start_angle: f64, switch_position: f64, switch_width: f64) -> Self {
        let steps = (start_angle / step_degrees).round() as i64;
        Self {
            inner: Arc::new(Mutex::new(TurntableState {
                steps,
                step_degrees,
                switch_position: switch_position.rem_euclid(360.0),
                switch_width,
                energized: false,
                step_calls: 0,
            })),
        }
    }

    /// True mechanical angle in `[0, 360)`.
    pub fn angle(&self) -> f64 {
        self.inner.lock().angle()
    }

    /// Number of step primitive invocations so far.
    pub fn step_calls(&self) -> u64 {
        self.inner.lock().step_calls
    }

    pub fn is_energized(&self) -> bool {
        self.inner.lock().energized
    }

    pub fn switch_closed(&self) -> bool {
        let state = self.inner.lock();
        let offset = (state.angle() - state.switch_position + 180.0).rem_euclid(360.0) - 180.0;
        offset.abs() <= state.switch_width / 2.0 + 1e-9
    }

    fn advance(&self, direction: Direction) {
        let mut state = self.inner.lock();
        state.steps += match direction {
            Direction::Forward => 1,
            Direction::Backward => -1,
        };
        state.step_calls += 1;
        state.energized = true;
    }

    fn release(&self) {
        self.inner.lock().energized = false;
    }
}

/// Stepper that moves a [`Turntable`].
#[derive(Debug)]
pub struct SimulatedStepper {
    turntable: Turntable,
    fail_after: Option<u64>,
}

impl SimulatedStepper {
    pub fn new(turntable: Turntable) -> Self {
        Self {
            turntable,
            fail_after: None,
        }
    }

    /// Make every step after the first `steps` successful ones fail.
    pub fn failing_after(mut self, steps: u64) -> Self {
        self.fail_after = Some(steps);
        self
    }
}

impl StepperDriver for SimulatedStepper {
    fn step(&mut self, direction: Direction) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if self.turntable.step_calls() >= limit {
                return Err(HardwareError::Step("simulated driver fault".to_owned()));
            }
        }
        self.turntable.advance(direction);
        Ok(())
    }

    fn release(&mut self) {
        self.turntable.release();
    }
}

/// Switch that closes when the turntable passes its configured bearing.
#[derive(Debug, Clone)]
pub struct SimulatedSwitch {
    turntable: Turntable,
}

impl SimulatedSwitch {
    pub fn new(turntable: Turntable) -> Self {
        Self { turntable }
    }
}

impl SwitchInput for SimulatedSwitch {
    fn read(&self) -> bool {
        self.turntable.switch_closed()
    }
}

/// Sensor producing a warm blob over a noisy ambient background.
pub struct SimulatedSensor {
    id: String,
    address: u8,
    mount_offset: f64,
    turntable: Turntable,
    ambient: f64,
    noise: Normal<f64>,
    rng: Mutex<StdRng>,
    failing: bool,
}

impl SimulatedSensor {
    pub fn new(
        id: impl Into<String>,
        address: u8,
        mount_offset: f64,
        turntable: Turntable,
        ambient: f64,
        noise_sigma: f64,
        seed: u64,
    ) -> Result<Self> {
        let id = id.into();
        let noise = Normal::new(0.0, noise_sigma)
            .map_err(|err| HardwareError::Init(format!("sensor '{id}' noise model: {err}")))?;
        Ok(Self {
            id,
            address,
            mount_offset,
            turntable,
            ambient,
            noise,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failing: false,
        })
    }

    /// Make every read fail.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl ThermalSensor for SimulatedSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn acquire_frame(&self) -> Result<Frame> {
        if self.failing {
            return Err(HardwareError::SensorRead {
                sensor: self.id.clone(),
                reason: "no acknowledgement on bus".to_owned(),
            });
        }
        let heading = self.turntable.angle() + self.mount_offset;
        let mut rng = self.rng.lock();
        let mut temperatures = Vec::with_capacity(FRAME_LEN);
        for _row in 0..FRAME_ROWS {
            for col in 0..FRAME_COLS {
                let bearing =
                    heading - SENSOR_FOV / 2.0 + SENSOR_FOV * (col as f64 + 0.5) / FRAME_COLS as f64;
                let miss = (bearing - HOTSPOT_BEARING + 180.0).rem_euclid(360.0) - 180.0;
                let warmth = HOTSPOT_DELTA * (-(miss * miss) / (2.0 * HOTSPOT_SPREAD.powi(2))).exp();
                let sample = self.ambient + warmth + self.noise.sample(&mut *rng);
                temperatures.push(sample as f32);
            }
        }
        Frame::new(temperatures)
    }
}

/// A complete simulated rig built from configuration.
pub struct SimulatedHardware {
    pub turntable: Turntable,
    pub stepper: SimulatedStepper,
    pub switch: SimulatedSwitch,
    pub sensors: Vec<Arc<dyn ThermalSensor>>,
}

impl SimulatedHardware {
    /// Build the simulated stepper, switch, and one sensor per configured id.
    ///
    /// Sensors are mounted evenly around the turntable.
    pub fn from_config(config: &RigConfig) -> Result<Self> {
        let sim = &config.simulation;
        let step_degrees = config.step_degrees();
        if sim.switch_width < step_degrees {
            return Err(HardwareError::Init(format!(
                "switch width {} is narrower than one step ({}); calibration could step over it",
                sim.switch_width, step_degrees
            )));
        }
        let turntable = Turntable::new(
            step_degrees,
            sim.start_angle,
            sim.switch_position,
            sim.switch_width,
        );
        let spacing = 360.0 / config.sensors.len() as f64;
        let mut sensors: Vec<Arc<dyn ThermalSensor>> = Vec::with_capacity(config.sensors.len());
        for (idx, (sensor_id, sensor)) in config.sensors.iter().enumerate() {
            let mut simulated = SimulatedSensor::new(
                sensor_id.clone(),
                sensor.address,
                spacing * idx as f64,
                turntable.clone(),
                sim.ambient,
                sim.noise_sigma,
                sim.seed.wrapping_add(idx as u64),
            )?;
            if sim.failing_sensors.iter().any(|id| id == sensor_id) {
                simulated = simulated.failing();
            }
            sensors.push(Arc::new(simulated));
        }
        debug!(
            sensors = sensors.len(),
            start_angle = turntable.angle(),
            "simulated hardware ready"
        );
        Ok(Self {
            stepper: SimulatedStepper::new(turntable.clone()),
            switch: SimulatedSwitch::new(turntable.clone()),
            turntable,
            sensors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepping_wraps_the_mechanical_angle() {
        let turntable = Turntable::new(0.9, 359.1, 0.0, 1.0);
        let mut stepper = SimulatedStepper::new(turntable.clone());
        stepper.step(Direction::Forward).unwrap();
        assert!(turntable.angle().abs() < 1e-9);
        stepper.step(Direction::Backward).unwrap();
        stepper.step(Direction::Backward).unwrap();
        assert!((turntable.angle() - 358.2).abs() < 1e-9);
        assert_eq!(turntable.step_calls(), 3);
        assert!(turntable.is_energized());
        stepper.release();
        assert!(!turntable.is_energized());
    }

    #[test]
    fn switch_closes_only_near_its_bearing() {
        let turntable = Turntable::new(0.9, 1.8, 0.0, 1.0);
        let switch = SimulatedSwitch::new(turntable.clone());
        let mut stepper = SimulatedStepper::new(turntable);
        assert!(!switch.read());
        stepper.step(Direction::Backward).unwrap();
        assert!(!switch.read());
        stepper.step(Direction::Backward).unwrap();
        assert!(switch.read());
    }

    #[test]
    fn injected_fault_stops_the_stepper() {
        let turntable = Turntable::new(0.9, 0.0, 0.0, 1.0);
        let mut stepper = SimulatedStepper::new(turntable.clone()).failing_after(2);
        stepper.step(Direction::Forward).unwrap();
        stepper.step(Direction::Forward).unwrap();
        assert!(stepper.step(Direction::Forward).is_err());
        assert_eq!(turntable.step_calls(), 2);
    }

    #[test]
    fn sensor_sees_hotspot_when_facing_it() {
        let turntable = Turntable::new(0.9, HOTSPOT_BEARING, 0.0, 1.0);
        let sensor = SimulatedSensor::new("camera0", 0x30, 0.0, turntable, 20.0, 0.0, 1).unwrap();
        let frame = sensor.acquire_frame().unwrap();
        let centre = frame.at(12, FRAME_COLS / 2).unwrap();
        let edge = frame.at(12, 0).unwrap();
        assert!(centre > edge + 5.0, "centre {centre} edge {edge}");
    }

    #[test]
    fn failing_sensor_reports_read_error() {
        let turntable = Turntable::new(0.9, 0.0, 0.0, 1.0);
        let sensor = SimulatedSensor::new("camera1", 0x31, 0.0, turntable, 20.0, 0.1, 1)
            .unwrap()
            .failing();
        assert!(matches!(
            sensor.acquire_frame(),
            Err(HardwareError::SensorRead { .. })
        ));
    }

    #[test]
    fn builds_from_default_config() {
        let hardware = SimulatedHardware::from_config(&RigConfig::default()).unwrap();
        assert_eq!(hardware.sensors.len(), 4);
        assert_eq!(hardware.sensors[2].address(), 0x32);
        assert!(hardware.switch.read());
    }

    #[test]
    fn rejects_switch_narrower_than_a_step() {
        let mut config = RigConfig::default();
        config.simulation.switch_width = 0.5;
        assert!(matches!(
            SimulatedHardware::from_config(&config),
            Err(HardwareError::Init(_))
        ));
    }
}
