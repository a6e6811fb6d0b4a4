//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Frame acquisition, statistics, and publishing."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};
use thermoscan_hal::{Frame, HardwareError, ThermalSensor, FRAME_COLS, FRAME_ROWS};
use thermoscan_motion::PositionStore;
use thermoscan_msg::Publisher;
use tracing::{debug, warn};

use crate::metrics::RigMetrics;

/// Summary statistics over one frame, degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

impl FrameStats {
    pub fn from_frame(frame: &Frame) -> Self {
        let samples: Vec<f64> = frame.temperatures().iter().map(|t| f64::from(*t)).collect();
        let mut data = Data::new(samples);
        Self {
            min: data.min(),
            max: data.max(),
            mean: data.mean().unwrap_or(f64::NAN),
            p5: data.percentile(5),
            p50: data.percentile(50),
            p95: data.percentile(95),
        }
    }
}

/// Published body of a frame topic.
#[derive(Debug, Clone, Serialize)]
pub struct FramePayload {
    pub sensor: String,
    pub address: u8,
    pub rows: usize,
    pub cols: usize,
    pub position: f64,
    pub captured_at: DateTime<Utc>,
    pub stats: FrameStats,
    pub temperatures: Vec<f32>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub published: usize,
    pub failed: usize,
}

/// Acquires frames from every sensor and publishes them with the current position.
pub struct FramePublisher {
    sensors: Vec<Arc<dyn ThermalSensor>>,
    position: Arc<PositionStore>,
    publisher: Arc<Publisher>,
    metrics: Arc<RigMetrics>,
}

impl FramePublisher {
    pub fn new(
        sensors: Vec<Arc<dyn ThermalSensor>>,
        position: Arc<PositionStore>,
        publisher: Arc<Publisher>,
        metrics: Arc<RigMetrics>,
    ) -> Self {
        Self {
            sensors,
            position,
            publisher,
            metrics,
        }
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|sensor| sensor.id())
    }

    pub fn sensor(&self, id: &str) -> Option<&Arc<dyn ThermalSensor>> {
        self.sensors.iter().find(|sensor| sensor.id() == id)
    }

    /// Acquire one frame from `sensor` and publish it plus the capture position.
    pub fn publish_sensor(&self, sensor: &dyn ThermalSensor) -> Result<FramePayload, HardwareError> {
        let frame = sensor.acquire_frame().map_err(|err| {
            self.metrics.record_frame_failure(sensor.id());
            err
        })?;
        let position = self.position.get();
        let payload = FramePayload {
            sensor: sensor.id().to_owned(),
            address: sensor.address(),
            rows: FRAME_ROWS,
            cols: FRAME_COLS,
            position,
            captured_at: Utc::now(),
            stats: FrameStats::from_frame(&frame),
            temperatures: frame.into_temperatures(),
        };
        let topics = self.publisher.topics();
        let frame_topic = topics.frame(sensor.id(), sensor.address());
        if let Err(err) = self.publisher.publish(&frame_topic, &payload, false) {
            warn!(sensor = sensor.id(), error = %err, "failed to publish frame");
        }
        let position_topic = topics.sensor_position(sensor.id());
        if let Err(err) = self.publisher.publish(&position_topic, &position, false) {
            warn!(sensor = sensor.id(), error = %err, "failed to publish capture position");
        }
        self.metrics.record_frame(sensor.id());
        debug!(sensor = sensor.id(), position, max = payload.stats.max, "frame published");
        Ok(payload)
    }

    /// Publish one frame per sensor; failed reads are logged and skipped.
    pub fn publish_all(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        for sensor in &self.sensors {
            match self.publish_sensor(sensor.as_ref()) {
                Ok(_) => summary.published += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(sensor = sensor.id(), error = %err, "skipping sensor after failed read");
                }
            }
        }
        summary
    }
}

impl std::fmt::Debug for FramePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePublisher")
            .field("sensors", &self.sensors.len())
            .finish_non_exhaustive()
    }
}
