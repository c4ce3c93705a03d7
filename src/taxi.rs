//! Taxi & Sense Resolver
//!
//! Decides whether the encoder counts up or down while the stage moves in the
//! requested direction, rounds the angular step to a whole number of encoder
//! counts, and adds the run-up and run-down travel ("taxi") the stage needs to
//! reach scan velocity before the first projection and to stop after the last.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::error::{PsoError, PsoResult};

/// Direction of a coordinate relative to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    /// Same direction
    Positive,
    /// Opposite direction
    Negative,
}

impl Sense {
    /// `Positive` for non-negative values.
    pub fn of(value: f64) -> Self {
        if value < 0.0 {
            Self::Negative
        } else {
            Self::Positive
        }
    }

    /// `+1.0` or `-1.0`.
    pub fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }

    /// Product of two senses.
    pub fn combine(self, other: Sense) -> Self {
        if self == other {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

/// The three direction factors of a scan and their product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Senses {
    /// Sign of `counts_per_rotation`
    pub encoder: Sense,
    /// Motor polarity
    pub motor: Sense,
    /// `Positive` when `rotation_stop > rotation_start`
    pub user: Sense,
    /// Whether encoder counts increase as the stage moves in the user direction
    pub overall: Sense,
}

/// Compute the direction factors for `config`.
pub fn compute_senses(config: &ScanConfig) -> Senses {
    let encoder = Sense::of(config.stage.counts_per_rotation as f64);
    let motor = Sense::of(f64::from(config.stage.rotation_direction.sign()));
    let user = if config.scan.rotation_stop > config.scan.rotation_start {
        Sense::Positive
    } else {
        Sense::Negative
    };
    Senses {
        encoder,
        motor,
        user,
        overall: encoder.combine(motor).combine(user),
    }
}

/// Rounding the step to whole encoder counts moved it by more than the
/// configured tolerance. The scan proceeds with the rounded step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationWarning {
    /// Requested step (degrees)
    pub nominal_step: f64,
    /// Step after rounding (degrees)
    pub corrected_step: f64,
    /// Step in encoder counts before rounding
    pub raw_counts: f64,
    /// Step in encoder counts after rounding
    pub rounded_counts: i64,
    /// `|raw_counts - rounded_counts|`
    pub drift: f64,
    /// Allowed drift in encoder counts
    pub tolerance: f64,
}

impl fmt::Display for QuantizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step of {:.6} deg is {:.6} encoder counts, rounded to {} ({:.6} deg); drift {:.6} exceeds tolerance {}",
            self.nominal_step,
            self.raw_counts,
            self.rounded_counts,
            self.corrected_step,
            self.drift,
            self.tolerance
        )
    }
}

/// Quantized step and taxi positions of a scan.
///
/// Angles are in user coordinates. `step` keeps the sign of the requested
/// motion; distances are magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxiGeometry {
    /// Direction factors
    pub senses: Senses,
    /// Requested first angle
    pub rotation_start: f64,
    /// Requested step `(stop - start) / (N - 1)`
    pub nominal_step: f64,
    /// Step rounded to a whole number of encoder counts
    pub step: f64,
    /// Encoder counts per step, signed like the encoder
    pub encoder_counts_per_step: i64,
    /// Exposure plus readout (seconds)
    pub frame_time: f64,
    /// Stage speed that advances one step per frame (deg/s)
    pub motor_speed: f64,
    /// Angle swept while ramping to `motor_speed`
    pub accel_dist: f64,
    /// Whole steps reserved for the ramp
    pub taxi_steps: u64,
    /// `taxi_steps * |step|`
    pub taxi_dist: f64,
    /// First projection after the sense correction
    pub rotation_start_new: f64,
    /// Last projection after the sense correction
    pub rotation_stop_new: f64,
    /// Where the stage starts moving
    pub start_taxi: f64,
    /// Where the stage comes to rest
    pub end_taxi: f64,
}

impl TaxiGeometry {
    /// Resolve the taxi geometry for `config`.
    ///
    /// Returns a [`QuantizationWarning`] next to the geometry when rounding the
    /// step drifted by more than `pulses.quantization_tolerance` counts.
    ///
    /// # Errors
    ///
    /// `Configuration` when the step rounds to zero encoder counts or the
    /// derived motor speed exceeds the stage limit.
    pub fn resolve(config: &ScanConfig) -> PsoResult<(Self, Option<QuantizationWarning>)> {
        let senses = compute_senses(config);
        let scan = &config.scan;
        let num_angles = scan.num_angles;
        if num_angles < 2 {
            return Err(PsoError::Configuration(format!(
                "num_angles must be >= 2, got {num_angles}"
            )));
        }

        let nominal_step = scan.nominal_step();
        let counts_per_degree = config.stage.counts_per_degree();
        let raw_counts = nominal_step * counts_per_degree;
        let rounded = raw_counts.round();
        if rounded == 0.0 {
            return Err(PsoError::Configuration(format!(
                "step of {nominal_step} deg is {raw_counts:.6} encoder counts and rounds to zero"
            )));
        }
        let encoder_counts_per_step = rounded as i64;
        let step = rounded / counts_per_degree;

        let drift = (raw_counts - rounded).abs();
        let tolerance = config.pulses.quantization_tolerance;
        let warning = (drift > tolerance).then(|| QuantizationWarning {
            nominal_step,
            corrected_step: step,
            raw_counts,
            rounded_counts: encoder_counts_per_step,
            drift,
            tolerance,
        });
        if let Some(w) = &warning {
            warn!(
                nominal_step,
                corrected_step = step,
                drift,
                tolerance,
                "Step quantization drift exceeds tolerance: {w}"
            );
        }

        let frame_time = config.camera.frame_time();
        let motor_speed = step.abs() / frame_time;
        if let Some(max) = config.stage.max_velocity {
            if motor_speed > max {
                return Err(PsoError::Configuration(format!(
                    "scan needs {motor_speed:.6} deg/s but max_velocity is {max}"
                )));
            }
        }
        let accel_dist = 0.5 * motor_speed * config.stage.accel_time;
        let taxi_steps = (accel_dist / step.abs() + 0.5).ceil() as u64;
        let taxi_dist = taxi_steps as f64 * step.abs();

        let rotation_start_new = match senses.overall {
            Sense::Positive => scan.rotation_start,
            Sense::Negative => {
                scan.rotation_start - (2.0 - config.camera.readout_margin) * step
            }
        };
        let rotation_stop_new = rotation_start_new + (num_angles as f64 - 1.0) * step;
        let user = senses.user.sign();
        let start_taxi = rotation_start_new - taxi_dist * user;
        let end_taxi = rotation_stop_new + taxi_dist * user;

        debug!(
            overall_sense = ?senses.overall,
            step,
            encoder_counts_per_step,
            motor_speed,
            taxi_steps,
            start_taxi,
            end_taxi,
            "Resolved taxi geometry"
        );

        Ok((
            Self {
                senses,
                rotation_start: scan.rotation_start,
                nominal_step,
                step,
                encoder_counts_per_step,
                frame_time,
                motor_speed,
                accel_dist,
                taxi_steps,
                taxi_dist,
                rotation_start_new,
                rotation_stop_new,
                start_taxi,
                end_taxi,
            },
            warning,
        ))
    }

    /// Equally spaced fly-scan positions `start_new + i * step`.
    pub fn theta_classic(&self, num_angles: usize) -> Vec<f64> {
        (0..num_angles)
            .map(|i| self.rotation_start_new + i as f64 * self.step)
            .collect()
    }

    /// Travel from the taxi start to the requested start, along the motion.
    pub fn lead(&self) -> f64 {
        (self.rotation_start - self.start_taxi) * self.senses.user.sign()
    }

    /// Distance travelled from the taxi start when the stage reaches the
    /// projection at offset `theta` from the requested start.
    pub fn taxi_correct(&self, theta: f64) -> f64 {
        theta + self.lead()
    }

    /// Total travel from taxi start to taxi end.
    pub fn total_travel(&self) -> f64 {
        (self.end_taxi - self.start_taxi).abs()
    }
}
