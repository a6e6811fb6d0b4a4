//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Shared primitives and utilities for the rig runtime."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
//! Shared primitives for the thermoscan workspace.
//! This crate exposes configuration loading, tracing setup, and the
//! direction/step-style vocabulary consumed by every other crate.

pub mod config;
pub mod logging;
pub mod types;

pub use config::{
    LoadedRigConfig, LoggingConfig, MotionConfig, PersistenceConfig, RigConfig, SensorConfig,
    SessionConfig, SimulationConfig, TransportConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use types::{Direction, ParseDirectionError, StepStyle};
