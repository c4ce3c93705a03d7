//! Custom error types for schedule computation.
//!
//! This module defines the primary error type, `PsoError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single place where every fatal
//! condition of the scan pipeline is named.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches while loading a scan configuration.
//! - **`Configuration`**: Semantic errors in a `ScanConfig` that parsed fine but
//!   cannot describe a valid scan (e.g. fewer than two projections).
//! - **`ProfileInfeasible`**: The requested velocity cannot be reached and left
//!   again within the angular span of the motion.
//! - **`Range`**: An angle handed to the inverse-time lookup lies outside the
//!   simulated motion.
//! - **`NonMonotonicPulse`**: A trigger delay stayed non-positive even after the
//!   one-revolution wraparound correction.
//! - **`PulseOverflow`**: A hardware-domain pulse count does not fit the 32-bit
//!   pulse register.
//! - **`Stage`**: Any of the above, tagged with the pipeline stage that failed.
//!
//! Quantization drift is deliberately absent: it is reported as a
//! [`crate::taxi::QuantizationWarning`] next to a still valid result.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type PsoResult<T> = std::result::Result<T, PsoError>;

/// Pipeline stage that produced a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Checking the effective scan configuration
    Validation,
    /// Reading stage parameters from a [`crate::params::ParameterProvider`]
    Parameters,
    /// Angle sequence generation
    Sequencer,
    /// Sense, step quantization and taxi distances
    Taxi,
    /// Trapezoidal motion simulation and inverse lookup
    Kinematics,
    /// Pulse quantization and delay generation
    Pulses,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Parameters => write!(f, "parameters"),
            Self::Sequencer => write!(f, "sequencer"),
            Self::Taxi => write!(f, "taxi"),
            Self::Kinematics => write!(f, "kinematics"),
            Self::Pulses => write!(f, "pulses"),
        }
    }
}

/// Fatal errors raised while computing a pulse schedule.
#[derive(Error, Debug)]
pub enum PsoError {
    /// Loading the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The configuration loaded but describes an invalid scan.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Acceleration plus deceleration distance covers the whole span.
    #[error(
        "Motion profile infeasible: ramps need {ramp_angle:.6} deg but the span is only {span:.6} deg"
    )]
    ProfileInfeasible {
        /// Angle swept by acceleration and deceleration together
        ramp_angle: f64,
        /// Configured angular span of the motion
        span: f64,
    },

    /// Angle outside the simulated motion.
    #[error("Angle {angle:.6} deg outside simulated motion range [{min:.6}, {max:.6}]")]
    Range {
        /// Offending angle
        angle: f64,
        /// Smallest covered angle
        min: f64,
        /// Largest covered angle
        max: f64,
    },

    /// A trigger delay is still non-positive after wraparound correction.
    #[error("Non-monotonic pulse sequence: delay {delay} at index {index} after wraparound correction")]
    NonMonotonicPulse {
        /// Position in the delay array
        index: usize,
        /// Corrected delay value
        delay: i64,
    },

    /// A hardware-domain pulse does not fit in 32 bits.
    #[error("Pulse count {value} at index {index} exceeds the 32-bit pulse register")]
    PulseOverflow {
        /// Position in the pulse array
        index: usize,
        /// Cumulative pulse count
        value: i64,
    },

    /// A fatal error tagged with the stage it came from.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Failing stage
        stage: Stage,
        /// Underlying error
        #[source]
        source: Box<PsoError>,
    },
}

impl PsoError {
    /// Tag this error with the stage that produced it.
    ///
    /// An error that already carries a stage keeps its original tag.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage that produced this error, if it has been tagged.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, with any stage tag removed.
    pub fn root(&self) -> &PsoError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension for attaching a [`Stage`] to any `PsoResult`.
pub trait StageContext<T> {
    /// Tag the error variant with `stage`.
    fn stage(self, stage: Stage) -> PsoResult<T>;
}

impl<T> StageContext<T> for PsoResult<T> {
    fn stage(self, stage: Stage) -> PsoResult<T> {
        self.map_err(|e| e.in_stage(stage))
    }
}
