//! Scan planning pipeline
//!
//! Runs the four stages for one [`ScanConfig`]:
//!
//! 1. **Sequencer**: interlaced acquisition order
//! 2. **Taxi**: direction sense, quantized step, run-up and run-down
//! 3. **Kinematics**: trapezoidal motion over the whole travel and the
//!    realizable trigger angles
//! 4. **Pulses**: ideal and real pulse schedules
//!
//! Every fatal error is tagged with the [`Stage`] that raised it. A
//! [`QuantizationWarning`] does not stop the pipeline; it is returned in
//! [`ScanPlan::warnings`].
//!
//! # Example
//!
//! ```no_run
//! use tomo_pso::{config::ScanConfig, pipeline::ScanPlanner};
//!
//! let plan = ScanPlanner::new(ScanConfig::default()).plan()?;
//! println!("{} delays, worst pulse error {}", plan.real.delays().len(), plan.max_pulse_error);
//! # Ok::<(), tomo_pso::error::PsoError>(())
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::config::ScanConfig;
use crate::error::{PsoResult, Stage, StageContext};
use crate::kinematics::{RealMotion, TrapezoidalProfile};
use crate::params::ParameterProvider;
use crate::pulses::{PulseQuantizer, PulseReference, PulseSchedule, QuantizedAngle};
use crate::sequence::{AngleSequence, Interlace, SequenceParams};
use crate::taxi::{QuantizationWarning, TaxiGeometry};

/// Every intermediate result of one planned scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPlan {
    /// Effective configuration, including provider-supplied stage parameters
    pub config: ScanConfig,
    /// Interlaced acquisition sequence
    pub sequence: AngleSequence,
    /// Requested angles in the configured acquisition order
    pub ideal_angles: Vec<f64>,
    /// Equally spaced positions of a classic fly scan
    pub classic_angles: Vec<f64>,
    /// Taxi geometry
    pub taxi: TaxiGeometry,
    /// Simulated motion from taxi start to taxi end
    pub profile: TrapezoidalProfile,
    /// Number of samples in the motion table
    pub motion_samples: usize,
    /// Requested angles as travel from the taxi start
    pub motion_angles: Vec<f64>,
    /// Angles the stage realizes
    pub real_motion: RealMotion,
    /// Quantization of the ideal pulse angles
    pub quantization: Vec<QuantizedAngle>,
    /// Schedule from the requested angles
    pub ideal: PulseSchedule,
    /// Schedule from the realized angles
    pub real: PulseSchedule,
    /// Non-fatal diagnostics
    pub warnings: Vec<QuantizationWarning>,
    /// Largest `|real - ideal|` raw pulse difference
    pub max_pulse_error: u64,
}

impl ScanPlan {
    /// Serialize the plan as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Delays to load into the pulse-sequence memory.
    pub fn hardware_delays(&self) -> &[u32] {
        self.real.delays()
    }
}

/// Computes scan plans for a fixed configuration.
#[derive(Debug, Clone)]
pub struct ScanPlanner {
    config: ScanConfig,
}

impl ScanPlanner {
    /// Planner for the given configuration.
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Configuration the planner runs with.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Plan with the stage parameters from the configuration.
    pub fn plan(&self) -> PsoResult<ScanPlan> {
        run(self.config.clone())
    }

    /// Plan with stage parameters queried from `provider`, replacing the
    /// configured `stage` section.
    pub fn plan_with<P: ParameterProvider + ?Sized>(&self, provider: &P) -> PsoResult<ScanPlan> {
        let stage = provider.stage_parameters().stage(Stage::Parameters)?;
        run(self.config.with_stage(stage))
    }
}

/// Angle swept by the simulated motion.
fn motion_span(config: &ScanConfig, taxi: &TaxiGeometry, ideal: &[f64]) -> f64 {
    if let Some(span) = config.motion.span {
        return span;
    }
    let span = config.interlace.span;
    let furthest = ideal.iter().copied().fold(0.0, f64::max);
    let turns = (furthest / span).ceil().max(1.0);
    taxi.lead() + turns * span + taxi.taxi_dist
}

fn run(config: ScanConfig) -> PsoResult<ScanPlan> {
    let span = info_span!(
        "scan_plan",
        method = %config.interlace.method,
        num_angles = config.scan.num_angles,
        loops = config.interlace.loops
    );
    let _enter = span.enter();

    config.validate().stage(Stage::Validation)?;

    let sequence = {
        let _s = info_span!("sequencer").entered();
        let sequence = config
            .interlace
            .method
            .generate(&SequenceParams::from_config(&config))
            .stage(Stage::Sequencer)?;
        info!(angles = sequence.len(), loops = sequence.loops(), "Sequence generated");
        sequence
    };

    let (taxi, warning) = {
        let _s = info_span!("taxi").entered();
        let resolved = TaxiGeometry::resolve(&config).stage(Stage::Taxi)?;
        info!(
            step = resolved.0.step,
            taxi_dist = resolved.0.taxi_dist,
            overall_sense = ?resolved.0.senses.overall,
            "Taxi resolved"
        );
        resolved
    };

    let ideal_angles = sequence.ordered(config.interlace.order);
    let classic_angles = taxi.theta_classic(config.scan.num_angles);
    let motion_angles: Vec<f64> = ideal_angles.iter().map(|&a| taxi.taxi_correct(a)).collect();

    let (profile, motion_samples, real_motion) = {
        let _s = info_span!("kinematics").entered();
        let velocity = config.stage.velocity.unwrap_or(taxi.motor_speed);
        let profile = TrapezoidalProfile::from_accel_time(
            velocity,
            config.stage.accel_time,
            motion_span(&config, &taxi, &ideal_angles),
        )
        .stage(Stage::Kinematics)?;
        let table = profile
            .sample(config.motion.dt, config.motion.max_samples)
            .stage(Stage::Kinematics)?;
        let real_motion = table.real_motion(&motion_angles).stage(Stage::Kinematics)?;
        info!(
            total_time = profile.total_time(),
            samples = table.len(),
            max_angle_error = real_motion.max_angle_error(),
            "Motion simulated"
        );
        (profile, table.len(), real_motion)
    };

    let (quantization, ideal, real) = {
        let _s = info_span!("pulses").entered();
        let shift = match config.pulses.reference {
            PulseReference::TaxiStart => 0.0,
            PulseReference::Zero => taxi.lead(),
        };
        let ideal_pulse_angles: Vec<f64> = motion_angles.iter().map(|a| a - shift).collect();
        let real_pulse_angles: Vec<f64> = real_motion.angles.iter().map(|a| a - shift).collect();

        let quantizer =
            PulseQuantizer::new(config.stage.counts_per_rotation_abs()).stage(Stage::Pulses)?;
        let leading = config.pulses.leading_offset;
        let ideal = quantizer
            .schedule(&ideal_pulse_angles, leading)
            .stage(Stage::Pulses)?;
        let real = quantizer
            .schedule(&real_pulse_angles, leading)
            .stage(Stage::Pulses)?;
        info!(
            delays = real.delays().len(),
            wraps = real.wraps(),
            total_span = real.total_span(),
            "Pulse schedule built"
        );
        (quantizer.report(&ideal_pulse_angles), ideal, real)
    };

    let max_pulse_error = ideal
        .raw_pulses()
        .iter()
        .zip(real.raw_pulses())
        .map(|(i, r)| i.abs_diff(*r))
        .max()
        .unwrap_or(0);

    Ok(ScanPlan {
        config,
        sequence,
        ideal_angles,
        classic_angles,
        taxi,
        profile,
        motion_samples,
        motion_angles,
        real_motion,
        quantization,
        ideal,
        real,
        warnings: warning.into_iter().collect(),
        max_pulse_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PsoError;
    use crate::sequence::{AcquisitionOrder, InterlaceMethod};

    fn quiet_config() -> ScanConfig {
        let mut config = ScanConfig::default();
        // 360/31 deg is a whole number of counts at 31 * 3600 counts/rev
        config.stage.counts_per_rotation = 111_600;
        config.motion.dt = 1e-3;
        config
    }

    #[test]
    fn test_default_plan() {
        let plan = ScanPlanner::new(quiet_config()).plan().unwrap();
        assert_eq!(plan.sequence.len(), 32);
        assert_eq!(plan.ideal.len(), 32);
        assert_eq!(plan.real.delays().len(), 32);
        assert!(plan.warnings.is_empty());
        assert!(plan.real.delays().iter().all(|&d| d > 0));
        assert!(plan.ideal.delays().iter().all(|&d| d > 0));
        // Sorted acquisition order never needs a wraparound
        assert_eq!(plan.real.wraps(), 0);
        assert_eq!(plan.ideal_angles, plan.sequence.sorted_angles());
    }

    #[test]
    fn test_first_pulse_measured_from_taxi_start() {
        let config = quiet_config();
        let plan = ScanPlanner::new(config.clone()).plan().unwrap();
        let q = PulseQuantizer::new(config.stage.counts_per_rotation_abs()).unwrap();
        assert_eq!(plan.ideal.offset() as i64, q.pulse_count(plan.taxi.lead()));

        let mut zero = config;
        zero.pulses.reference = PulseReference::Zero;
        let plan = ScanPlanner::new(zero).plan().unwrap();
        // First sorted angle is 0 deg, one revolution after the zero reference
        assert_eq!(plan.ideal.raw_pulses()[0], 0);
        assert_eq!(plan.ideal.delays()[0], 111_600);
    }

    #[test]
    fn test_quantization_warning_is_not_fatal() {
        let mut config = quiet_config();
        config.stage.counts_per_rotation = 20_000;
        let plan = ScanPlanner::new(config).plan().unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].drift > plan.warnings[0].tolerance);
    }

    #[test]
    fn test_time_order_wraps() {
        let mut config = quiet_config();
        config.interlace.order = AcquisitionOrder::TimeOrder;
        let plan = ScanPlanner::new(config).plan().unwrap();
        // Loop boundaries step back in angle
        assert!(plan.ideal.wraps() > 0);
        assert!(plan.ideal.pulses().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unwrapped_order_covers_extra_turns() {
        let mut config = quiet_config();
        config.interlace.order = AcquisitionOrder::Unwrapped;
        let plan = ScanPlanner::new(config).plan().unwrap();
        assert!(plan.ideal_angles.iter().copied().fold(0.0, f64::max) > 360.0);
        assert!(plan.profile.span() > 720.0);
    }

    #[test]
    fn test_all_methods_plan() {
        for method in InterlaceMethod::ALL {
            let mut config = quiet_config();
            config.interlace.method = method;
            let plan = ScanPlanner::new(config).plan().unwrap();
            assert_eq!(plan.sequence.method(), method);
            assert!(plan.real.delays().iter().all(|&d| d > 0));
        }
    }

    #[test]
    fn test_real_pulses_close_to_ideal() {
        let plan = ScanPlanner::new(quiet_config()).plan().unwrap();
        // Snapping moves an angle by at most half a sample at plateau speed
        let bound = plan.profile.velocity() * plan.config.motion.dt / 2.0;
        let counts = bound * 111_600.0 / 360.0;
        assert!(plan.max_pulse_error as f64 <= counts.ceil() + 1.0);
    }

    #[test]
    fn test_errors_carry_stage() {
        let mut config = quiet_config();
        config.scan.num_angles = 1;
        let err = ScanPlanner::new(config).plan().unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Validation));

        let mut config = quiet_config();
        config.motion.span = Some(1.0);
        let err = ScanPlanner::new(config).plan().unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Kinematics));
        assert!(matches!(err.root(), PsoError::ProfileInfeasible { .. }));
    }

    struct FailingProvider;

    impl ParameterProvider for FailingProvider {
        fn stage_parameters(&self) -> PsoResult<crate::params::StageParameters> {
            Err(PsoError::Configuration("stage not connected".into()))
        }
    }

    #[test]
    fn test_provider_overrides_stage() {
        let planner = ScanPlanner::new(quiet_config());
        let stage = crate::params::StageParameters {
            counts_per_rotation: 36_000,
            ..Default::default()
        };
        let plan = planner.plan_with(&stage).unwrap();
        assert_eq!(plan.config.stage.counts_per_rotation, 36_000);

        let err = planner.plan_with(&FailingProvider).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Parameters));
    }

    #[test]
    fn test_plan_serializes() {
        let plan = ScanPlanner::new(quiet_config()).plan().unwrap();
        let json = plan.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ideal_angles"].as_array().map(Vec::len), Some(32));
        assert!(value["real"]["delays"].is_array());
    }
}
