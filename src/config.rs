//! Scan configuration using Figment
//!
//! A [`ScanConfig`] fully describes one fly scan: the requested angular range,
//! the rotation stage, camera timing, the interlacing policy, the kinematic
//! simulation and how pulses are emitted. Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `TOMOPSO_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! TOMOPSO_SCAN__NUM_ANGLES=1500
//! TOMOPSO_INTERLACE__METHOD=GoldenAngle
//! TOMOPSO_STAGE__COUNTS_PER_ROTATION=11840200
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tomo_pso::config::ScanConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::load()?;
//!     println!("{} projections in {} loops", config.scan.num_angles, config.interlace.loops);
//!     Ok(())
//! }
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{PsoError, PsoResult};
use crate::params::StageParameters;
use crate::pulses::PulseReference;
use crate::sequence::{
    AcquisitionOrder, AngleWrap, GoldenCount, InterlaceMethod, SequenceParams,
};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "TOMOPSO_";

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/tomo_pso.toml";

/// Top-level scan configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Requested angular range and projection count
    #[serde(default)]
    pub scan: ScanRange,
    /// Rotation stage and encoder
    #[serde(default)]
    pub stage: StageParameters,
    /// Camera timing
    #[serde(default)]
    pub camera: CameraTiming,
    /// Interlacing policy
    #[serde(default)]
    pub interlace: InterlaceConfig,
    /// Kinematic simulation
    #[serde(default)]
    pub motion: MotionConfig,
    /// Pulse generation
    #[serde(default)]
    pub pulses: PulseConfig,
}

/// Requested angular range in user coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRange {
    /// First projection angle (degrees)
    #[serde(default)]
    pub rotation_start: f64,
    /// Last projection angle (degrees)
    #[serde(default = "default_rotation_stop")]
    pub rotation_stop: f64,
    /// Number of projections `N`
    #[serde(default = "default_num_angles")]
    pub num_angles: usize,
}

/// Camera exposure and readout timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraTiming {
    /// Exposure time (seconds)
    #[serde(default = "default_exposure")]
    pub exposure: f64,
    /// Readout time (seconds)
    #[serde(default = "default_readout")]
    pub readout: f64,
    /// Readout margin in frames, used when the encoder counts against the motion
    #[serde(default = "default_readout_margin")]
    pub readout_margin: f64,
}

/// Interlacing policy and sequence views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlaceConfig {
    /// Policy used to order the projections
    #[serde(default)]
    pub method: InterlaceMethod,
    /// Number of interlace loops `K`
    #[serde(default = "default_loops")]
    pub loops: usize,
    /// First angle of golden-angle and round-robin sequences (degrees)
    #[serde(default)]
    pub start: f64,
    /// Angular span of one loop (degrees)
    #[serde(default = "default_span")]
    pub span: f64,
    /// Modulus of bit-reversal angles
    #[serde(default)]
    pub wrap: AngleWrap,
    /// Decimal places compared when removing duplicate golden angles
    #[serde(default = "default_dedup_decimals")]
    pub dedup_decimals: u32,
    /// Whether each golden-angle loop takes `N` projections or a share of them
    #[serde(default)]
    pub golden_count: GoldenCount,
    /// Sequence view converted to pulses
    #[serde(default)]
    pub order: AcquisitionOrder,
}

/// Kinematic simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Sampling step of the motion tables (seconds)
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Upper bound on samples per motion table
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Total travel of the simulated motion, taxi included. When absent it is
    /// the run-up, enough whole interlace spans to reach every acquisition,
    /// and the run-down.
    #[serde(default)]
    pub span: Option<f64>,
}

/// Pulse generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Emit the offset from the reference to the first trigger as delay 0
    #[serde(default = "default_leading_offset")]
    pub leading_offset: bool,
    /// Where encoder count zero sits
    #[serde(default)]
    pub reference: PulseReference,
    /// Allowed drift (encoder counts) when rounding the step before warning
    #[serde(default = "default_quantization_tolerance")]
    pub quantization_tolerance: f64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_rotation_stop() -> f64 {
    360.0
}

fn default_num_angles() -> usize {
    32
}

fn default_exposure() -> f64 {
    0.01
}

fn default_readout() -> f64 {
    0.01
}

fn default_readout_margin() -> f64 {
    1.0
}

fn default_loops() -> usize {
    4
}

fn default_span() -> f64 {
    360.0
}

fn default_dedup_decimals() -> u32 {
    4
}

fn default_dt() -> f64 {
    1e-4
}

fn default_max_samples() -> usize {
    5_000_000
}

fn default_leading_offset() -> bool {
    true
}

fn default_quantization_tolerance() -> f64 {
    1e-4
}

impl Default for ScanRange {
    fn default() -> Self {
        Self {
            rotation_start: 0.0,
            rotation_stop: default_rotation_stop(),
            num_angles: default_num_angles(),
        }
    }
}

impl Default for CameraTiming {
    fn default() -> Self {
        Self {
            exposure: default_exposure(),
            readout: default_readout(),
            readout_margin: default_readout_margin(),
        }
    }
}

impl Default for InterlaceConfig {
    fn default() -> Self {
        Self {
            method: InterlaceMethod::default(),
            loops: default_loops(),
            start: 0.0,
            span: default_span(),
            wrap: AngleWrap::default(),
            dedup_decimals: default_dedup_decimals(),
            golden_count: GoldenCount::default(),
            order: AcquisitionOrder::default(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            max_samples: default_max_samples(),
            span: None,
        }
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            leading_offset: default_leading_offset(),
            reference: PulseReference::default(),
            quantization_tolerance: default_quantization_tolerance(),
        }
    }
}

impl CameraTiming {
    /// Time the camera needs per projection: exposure plus readout.
    pub fn frame_time(&self) -> f64 {
        self.exposure + self.readout
    }
}

impl ScanRange {
    /// Requested angular step before encoder quantization.
    pub fn nominal_step(&self) -> f64 {
        (self.rotation_stop - self.rotation_start) / (self.num_angles as f64 - 1.0)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ScanConfig {
    /// Load configuration from the default file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `PsoError` if the file cannot be parsed or validation fails.
    pub fn load() -> PsoResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific TOML file, with `TOMOPSO_`
    /// environment variables taking precedence.
    ///
    /// Keys missing from both sources take their defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PsoResult<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(toml: &str) -> PsoResult<Self> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> PsoResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML, e.g. to write a template file.
    pub fn to_toml_string(&self) -> PsoResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PsoError::Configuration(format!("Failed to serialize config: {e}")))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - at least two projections, distinct start and stop
    /// - interlace loops in `[1, N]` and a positive span
    /// - positive exposure and readout, finite readout margin
    /// - stage parameters (see [`StageParameters::validate`])
    /// - positive sampling step, non-zero sample budget, positive motion span
    /// - non-negative quantization tolerance
    ///
    /// # Errors
    ///
    /// Returns `PsoError::Configuration` with a descriptive message for any
    /// validation failure.
    pub fn validate(&self) -> PsoResult<()> {
        if !(self.scan.rotation_start.is_finite() && self.scan.rotation_stop.is_finite()) {
            return Err(PsoError::Configuration(
                "rotation_start and rotation_stop must be finite".to_string(),
            ));
        }
        if self.scan.rotation_start == self.scan.rotation_stop {
            return Err(PsoError::Configuration(format!(
                "rotation_start and rotation_stop are both {}",
                self.scan.rotation_start
            )));
        }

        SequenceParams::from_config(self).validate()?;
        if self.interlace.order == AcquisitionOrder::Unwrapped
            && matches!(
                self.interlace.method,
                InterlaceMethod::GoldenAngle | InterlaceMethod::FibonacciOffset
            )
        {
            // The golden step is more than half a span, so unwrapping runs backwards
            return Err(PsoError::Configuration(format!(
                "order \"unwrapped\" is not supported with {} interlacing, use \"sorted\" \
                 or \"time_order\"",
                self.interlace.method
            )));
        }

        if !(self.camera.exposure.is_finite() && self.camera.exposure > 0.0) {
            return Err(PsoError::Configuration(format!(
                "exposure must be > 0, got {}",
                self.camera.exposure
            )));
        }
        if !(self.camera.readout.is_finite() && self.camera.readout > 0.0) {
            return Err(PsoError::Configuration(format!(
                "readout must be > 0, got {}",
                self.camera.readout
            )));
        }
        if !self.camera.readout_margin.is_finite() {
            return Err(PsoError::Configuration(
                "readout_margin must be finite".to_string(),
            ));
        }

        self.stage.validate()?;

        if !(self.motion.dt.is_finite() && self.motion.dt > 0.0) {
            return Err(PsoError::Configuration(format!(
                "motion dt must be > 0, got {}",
                self.motion.dt
            )));
        }
        if self.motion.max_samples < 2 {
            return Err(PsoError::Configuration(
                "motion max_samples must be >= 2".to_string(),
            ));
        }
        if let Some(span) = self.motion.span {
            if !(span.is_finite() && span > 0.0) {
                return Err(PsoError::Configuration(format!(
                    "motion span must be > 0, got {span}"
                )));
            }
        }

        if !(self.pulses.quantization_tolerance.is_finite()
            && self.pulses.quantization_tolerance >= 0.0)
        {
            return Err(PsoError::Configuration(format!(
                "quantization_tolerance must be >= 0, got {}",
                self.pulses.quantization_tolerance
            )));
        }

        Ok(())
    }

    /// Copy of this configuration with the stage section replaced.
    pub fn with_stage(&self, stage: StageParameters) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.num_angles, 32);
        assert_eq!(config.interlace.loops, 4);
        assert_eq!(config.stage.counts_per_rotation, 20_000);
        assert_eq!(config.camera.frame_time(), 0.02);
    }

    #[test]
    fn test_nominal_step() {
        let range = ScanRange {
            rotation_start: 0.0,
            rotation_stop: 180.0,
            num_angles: 181,
        };
        assert_eq!(range.nominal_step(), 1.0);
    }

    #[test]
    fn test_too_few_angles() {
        let mut config = ScanConfig::default();
        config.scan.num_angles = 1;
        config.interlace.loops = 1;
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("num_angles"));
    }

    #[test]
    fn test_loops_exceed_angles() {
        let mut config = ScanConfig::default();
        config.scan.num_angles = 4;
        config.interlace.loops = 8;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("cannot exceed num_angles"));
    }

    #[test]
    fn test_golden_count_from_toml() {
        assert_eq!(
            ScanConfig::default().interlace.golden_count,
            GoldenCount::PerLoop
        );
        let config = ScanConfig::from_toml_str(
            "[interlace]\nmethod = \"GoldenAngle\"\ngolden_count = \"split\"\n",
        )
        .unwrap();
        assert_eq!(config.interlace.golden_count, GoldenCount::Split);
        assert_eq!(
            SequenceParams::from_config(&config).golden_count,
            GoldenCount::Split
        );
    }

    #[test]
    fn test_unwrapped_order_needs_forward_steps() {
        for method in InterlaceMethod::ALL {
            let mut config = ScanConfig::default();
            config.interlace.method = method;
            config.interlace.order = AcquisitionOrder::Unwrapped;
            match method {
                InterlaceMethod::GoldenAngle | InterlaceMethod::FibonacciOffset => {
                    assert!(matches!(
                        config.validate(),
                        Err(PsoError::Configuration(msg)) if msg.contains("unwrapped")
                    ));
                }
                InterlaceMethod::Timbir | InterlaceMethod::RoundRobin => {
                    assert!(config.validate().is_ok());
                }
            }
        }
    }

    #[test]
    fn test_zero_counts_per_rotation() {
        let mut config = ScanConfig::default();
        config.stage.counts_per_rotation = 0;
        assert!(matches!(
            config.validate(),
            Err(PsoError::Configuration(msg)) if msg.contains("counts_per_rotation")
        ));
    }

    #[test]
    fn test_empty_range() {
        let mut config = ScanConfig::default();
        config.scan.rotation_stop = config.scan.rotation_start;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_camera_timing() {
        let mut config = ScanConfig::default();
        config.camera.exposure = 0.0;
        assert!(config.validate().unwrap_err().to_string().contains("exposure"));

        let mut config = ScanConfig::default();
        config.camera.readout = -0.01;
        assert!(config.validate().unwrap_err().to_string().contains("readout"));
    }

    #[test]
    fn test_invalid_motion_settings() {
        let mut config = ScanConfig::default();
        config.motion.dt = 0.0;
        assert!(config.validate().unwrap_err().to_string().contains("dt"));

        let mut config = ScanConfig::default();
        config.motion.span = Some(-1.0);
        assert!(config.validate().unwrap_err().to_string().contains("motion span"));
    }

    #[test]
    fn test_from_toml_str_partial() {
        let config = ScanConfig::from_toml_str(
            r#"
            [scan]
            num_angles = 64

            [interlace]
            method = "GoldenAngle"
            loops = 8
            order = "time_order"

            [stage]
            counts_per_rotation = 11840200
            rotation_direction = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.num_angles, 64);
        assert_eq!(config.scan.rotation_stop, 360.0);
        assert_eq!(config.interlace.method, InterlaceMethod::GoldenAngle);
        assert_eq!(config.interlace.order, AcquisitionOrder::TimeOrder);
        assert_eq!(config.stage.counts_per_rotation, 11_840_200);
        assert_eq!(
            config.stage.rotation_direction,
            crate::params::RotationDirection::Negative
        );
        assert_eq!(config.camera, CameraTiming::default());
    }

    #[test]
    fn test_from_toml_str_rejects_invalid() {
        let result = ScanConfig::from_toml_str(
            r#"
            [scan]
            num_angles = 1
            "#,
        );
        assert!(matches!(result, Err(PsoError::Configuration(_))));

        let result = ScanConfig::from_toml_str(
            r#"
            [stage]
            rotation_direction = 7
            "#,
        );
        assert!(matches!(result, Err(PsoError::Config(_))));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ScanConfig::default();
        config.interlace.method = InterlaceMethod::FibonacciOffset;
        config.motion.span = Some(720.0);
        let text = config.to_toml_string().unwrap();
        let parsed = ScanConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
