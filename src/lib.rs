//! Core library for interlaced tomography fly scans.
//!
//! This library computes, ahead of a scan, the interlaced acquisition order of
//! the projection angles, the angles the rotation stage actually reaches under
//! a trapezoidal velocity profile, and the encoder pulse schedule a PSO
//! trigger generator consumes. It is used by the `pso_plan` binary and by scan
//! controllers that load the delays into the pulse-sequence memory.

pub mod config;
pub mod error;
pub mod kinematics;
pub mod params;
pub mod pipeline;
pub mod pulses;
pub mod sequence;
pub mod taxi;

pub use config::ScanConfig;
pub use error::{PsoError, PsoResult, Stage};
pub use params::{ParameterProvider, StageParameters};
pub use pipeline::{ScanPlan, ScanPlanner};
