//! Stage parameters and the provider interface that supplies them.
//!
//! Motor and encoder values (counts per rotation, motor polarity, ramp time,
//! velocity limits) belong to the rotation stage, not to the scan request.
//! They reach the planner through [`ParameterProvider`], so the numerical core
//! never reads live hardware state itself. A control-system adapter implements
//! the trait and is responsible for its own timeouts and retries.

use serde::{Deserialize, Serialize};

use crate::error::{PsoError, PsoResult};

/// Motor polarity as reported by the motor record (`0` positive, `1` negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RotationDirection {
    /// Dial and user coordinates agree
    #[default]
    Positive,
    /// Dial and user coordinates are inverted
    Negative,
}

impl RotationDirection {
    /// `+1` for positive polarity, `-1` otherwise.
    pub fn sign(self) -> i32 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
        }
    }
}

impl TryFrom<u8> for RotationDirection {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Positive),
            1 => Ok(Self::Negative),
            other => Err(format!("rotation_direction must be 0 or 1, got {other}")),
        }
    }
}

impl From<RotationDirection> for u8 {
    fn from(value: RotationDirection) -> Self {
        match value {
            RotationDirection::Positive => 0,
            RotationDirection::Negative => 1,
        }
    }
}

/// Snapshot of the rotation stage parameters used for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    /// Encoder counts per full revolution. The sign encodes the encoder
    /// counting direction relative to dial coordinates.
    #[serde(default = "default_counts_per_rotation")]
    pub counts_per_rotation: i64,
    /// Motor polarity
    #[serde(default)]
    pub rotation_direction: RotationDirection,
    /// Time to ramp from rest to scan velocity (seconds)
    #[serde(default = "default_accel_time")]
    pub accel_time: f64,
    /// Stage velocity for the plateau (deg/s); derived from the frame time when absent
    #[serde(default)]
    pub velocity: Option<f64>,
    /// Upper velocity limit of the stage (deg/s)
    #[serde(default)]
    pub max_velocity: Option<f64>,
}

fn default_counts_per_rotation() -> i64 {
    20_000
}

fn default_accel_time() -> f64 {
    0.15
}

impl Default for StageParameters {
    fn default() -> Self {
        Self {
            counts_per_rotation: default_counts_per_rotation(),
            rotation_direction: RotationDirection::default(),
            accel_time: default_accel_time(),
            velocity: None,
            max_velocity: None,
        }
    }
}

impl StageParameters {
    /// Check the values a valid scan depends on.
    pub fn validate(&self) -> PsoResult<()> {
        if self.counts_per_rotation == 0 {
            return Err(PsoError::Configuration(
                "counts_per_rotation must be non-zero".to_string(),
            ));
        }
        if self.counts_per_rotation.unsigned_abs() > u64::from(u32::MAX) {
            return Err(PsoError::Configuration(format!(
                "counts_per_rotation {} does not fit the 32-bit pulse register",
                self.counts_per_rotation
            )));
        }
        if !(self.accel_time.is_finite() && self.accel_time > 0.0) {
            return Err(PsoError::Configuration(format!(
                "accel_time must be > 0, got {}",
                self.accel_time
            )));
        }
        if let Some(velocity) = self.velocity {
            if !(velocity.is_finite() && velocity > 0.0) {
                return Err(PsoError::Configuration(format!(
                    "velocity must be > 0, got {velocity}"
                )));
            }
            if let Some(max) = self.max_velocity {
                if velocity > max {
                    return Err(PsoError::Configuration(format!(
                        "velocity {velocity} exceeds max_velocity {max}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encoder counts per degree, signed like `counts_per_rotation`.
    pub fn counts_per_degree(&self) -> f64 {
        self.counts_per_rotation as f64 / 360.0
    }

    /// Magnitude of `counts_per_rotation` in the hardware counter domain.
    pub fn counts_per_rotation_abs(&self) -> u32 {
        u32::try_from(self.counts_per_rotation.unsigned_abs()).unwrap_or(u32::MAX)
    }
}

/// Source of stage parameters for a scan.
///
/// Queried once per scan setup. Implementations talking to a control system
/// should map their transport failures to [`PsoError::Configuration`].
pub trait ParameterProvider {
    /// Return the current stage parameters.
    fn stage_parameters(&self) -> PsoResult<StageParameters>;
}

impl ParameterProvider for StageParameters {
    fn stage_parameters(&self) -> PsoResult<StageParameters> {
        Ok(self.clone())
    }
}

impl<P: ParameterProvider + ?Sized> ParameterProvider for &P {
    fn stage_parameters(&self) -> PsoResult<StageParameters> {
        (**self).stage_parameters()
    }
}
