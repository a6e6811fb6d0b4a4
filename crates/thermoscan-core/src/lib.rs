//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "module"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Session lifecycle and command dispatch."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
//! Rig assembly, background sessions, and the command dispatcher.

pub mod dispatcher;
pub mod error;
pub mod frames;
pub mod metrics;
pub mod params;
pub mod rig;
pub mod session;

pub use dispatcher::{Command, Dispatcher};
pub use error::CommandError;
pub use frames::{FramePayload, FramePublisher, FrameStats, SweepSummary};
pub use metrics::RigMetrics;
pub use params::{ParamDefault, ParamKind, ParamSpec, ParamValue, Params};
pub use rig::{Rig, RigHardware, RigState};
pub use session::{CancelToken, LoopKind, ScanParams, SessionError, SessionManager, SessionState};
