//! Angle Sequencer
//!
//! Produces the time-ordered list of projection angles for an interlaced scan,
//! together with the loop each acquisition belongs to.
//!
//! Every policy implements [`Interlace`]. [`InterlaceMethod`] is the tagged
//! variant used by configuration files and by name lookup:
//!
//! - [`InterlaceMethod::Timbir`]: bit-reversal interlacing ([`BitReversal`])
//! - [`InterlaceMethod::GoldenAngle`]: golden-angle loops with equally spaced offsets
//! - [`InterlaceMethod::FibonacciOffset`]: golden-angle loops with Fibonacci offsets
//! - [`InterlaceMethod::RoundRobin`]: equally spaced angles dealt to loops in turn
//!
//! An [`AngleSequence`] keeps three views of the same acquisitions: the time
//! order as generated, the order sorted by angle (what the trigger hardware
//! wants), and the unwrapped phase-continuous angles.

pub mod bit_reversal;
pub mod golden;
pub mod round_robin;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::{PsoError, PsoResult};

pub use bit_reversal::{bit_reverse, generalized_bit_reversal, BitReversal};
pub use golden::{GoldenAngle, GoldenCount, GoldenOffsets, GOLDEN_RATIO};
pub use round_robin::RoundRobin;

/// One projection: the angle to acquire and the interlace loop it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Target angle in degrees
    pub angle: f64,
    /// Interlace loop in `[0, K)`
    pub loop_id: usize,
}

/// Modulus applied to bit-reversal angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleWrap {
    /// Angles in `[0, 360)`
    #[default]
    Full,
    /// Angles folded into `[0, 180)` for parallel-beam tomography
    Half,
}

impl AngleWrap {
    /// Wrap period in degrees.
    pub fn period(self) -> f64 {
        match self {
            Self::Full => 360.0,
            Self::Half => 180.0,
        }
    }

    /// Fold `angle` into `[0, period)`.
    pub fn apply(self, angle: f64) -> f64 {
        angle.rem_euclid(self.period())
    }
}

/// Which view of the sequence is converted to pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionOrder {
    /// Ascending angle, one pass over the span
    #[default]
    Sorted,
    /// Order of generation; wraps across revolutions
    TimeOrder,
    /// Time order made phase-continuous, spanning several revolutions
    Unwrapped,
}

/// Inputs shared by all interlacing policies.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceParams {
    /// Total number of projections `N`
    pub num_angles: usize,
    /// Number of interlace loops `K`
    pub loops: usize,
    /// First angle of the golden-angle and round-robin policies
    pub start: f64,
    /// Angular span covered by one loop
    pub span: f64,
    /// Modulus for bit-reversal angles
    pub wrap: AngleWrap,
    /// Decimal places compared when removing duplicate golden angles
    pub dedup_decimals: u32,
    /// Projections per golden-angle loop
    pub golden_count: GoldenCount,
}

impl SequenceParams {
    /// Collect sequencer inputs from a scan configuration.
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            num_angles: config.scan.num_angles,
            loops: config.interlace.loops,
            start: config.interlace.start,
            span: config.interlace.span,
            wrap: config.interlace.wrap,
            dedup_decimals: config.interlace.dedup_decimals,
            golden_count: config.interlace.golden_count,
        }
    }

    /// Check `N` and `K`.
    pub fn validate(&self) -> PsoResult<()> {
        if self.num_angles < 2 {
            return Err(PsoError::Configuration(format!(
                "num_angles must be >= 2, got {}",
                self.num_angles
            )));
        }
        if self.loops == 0 {
            return Err(PsoError::Configuration(
                "interlace loops must be >= 1".to_string(),
            ));
        }
        if self.loops > self.num_angles {
            return Err(PsoError::Configuration(format!(
                "interlace loops ({}) cannot exceed num_angles ({})",
                self.loops, self.num_angles
            )));
        }
        if !(self.span.is_finite() && self.span > 0.0) {
            return Err(PsoError::Configuration(format!(
                "interlace span must be > 0, got {}",
                self.span
            )));
        }
        Ok(())
    }

    /// Number of projections assigned to `loop_id` when `N` is split across
    /// `K` loops as evenly as integer division allows.
    pub fn loop_share(&self, loop_id: usize) -> usize {
        let base = self.num_angles / self.loops;
        let extra = self.num_angles % self.loops;
        base + usize::from(loop_id < extra)
    }
}

/// An interlacing policy.
pub trait Interlace {
    /// Generate the acquisition sequence for `params`.
    fn generate(&self, params: &SequenceParams) -> PsoResult<AngleSequence>;
}

/// Interlacing policy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterlaceMethod {
    /// Bit-reversal interlacing
    #[default]
    Timbir,
    /// Golden-angle loops, offsets equally spaced over the span
    GoldenAngle,
    /// Golden-angle loops, offsets from the Fibonacci rule
    FibonacciOffset,
    /// Plain equally spaced angles, loop = index mod K
    RoundRobin,
}

impl InterlaceMethod {
    /// All selectable methods.
    pub const ALL: [InterlaceMethod; 4] = [
        Self::Timbir,
        Self::GoldenAngle,
        Self::FibonacciOffset,
        Self::RoundRobin,
    ];

    /// Configuration key of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timbir => "Timbir",
            Self::GoldenAngle => "GoldenAngle",
            Self::FibonacciOffset => "FibonacciOffset",
            Self::RoundRobin => "RoundRobin",
        }
    }
}

impl fmt::Display for InterlaceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterlaceMethod {
    type Err = PsoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        match key.as_str() {
            "timbir" | "bitreversal" => Ok(Self::Timbir),
            "goldenangle" | "golden" => Ok(Self::GoldenAngle),
            "fibonaccioffset" | "fibonacci" => Ok(Self::FibonacciOffset),
            "roundrobin" => Ok(Self::RoundRobin),
            _ => Err(PsoError::Configuration(format!(
                "Unknown interlace method '{s}'. Must be one of: {}",
                Self::ALL.map(|m| m.as_str()).join(", ")
            ))),
        }
    }
}

impl Interlace for InterlaceMethod {
    fn generate(&self, params: &SequenceParams) -> PsoResult<AngleSequence> {
        let sequence = match self {
            Self::Timbir => BitReversal.generate(params)?,
            Self::GoldenAngle => GoldenAngle::new(GoldenOffsets::Equal).generate(params)?,
            Self::FibonacciOffset => GoldenAngle::new(GoldenOffsets::Fibonacci).generate(params)?,
            Self::RoundRobin => RoundRobin.generate(params)?,
        };
        Ok(sequence.with_method(*self))
    }
}

/// Acquisition sequence of one scan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleSequence {
    method: InterlaceMethod,
    loops: usize,
    period: f64,
    time_order: Vec<Acquisition>,
    sorted: Vec<Acquisition>,
    unwrapped: Vec<f64>,
}

impl AngleSequence {
    /// Build the sequence views from acquisitions in time order.
    ///
    /// `period` is the wrap period used for the unwrapped view.
    pub fn new(
        method: InterlaceMethod,
        loops: usize,
        period: f64,
        time_order: Vec<Acquisition>,
    ) -> Self {
        let mut sorted = time_order.clone();
        sorted.sort_by(|a, b| a.angle.total_cmp(&b.angle));
        let angles: Vec<f64> = time_order.iter().map(|a| a.angle).collect();
        let unwrapped = unwrap_angles(&angles, period);
        Self {
            method,
            loops,
            period,
            time_order,
            sorted,
            unwrapped,
        }
    }

    fn with_method(mut self, method: InterlaceMethod) -> Self {
        self.method = method;
        self
    }

    /// Policy that produced this sequence.
    pub fn method(&self) -> InterlaceMethod {
        self.method
    }

    /// Number of interlace loops `K`.
    pub fn loops(&self) -> usize {
        self.loops
    }

    /// Wrap period of the angles.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Number of acquisitions.
    pub fn len(&self) -> usize {
        self.time_order.len()
    }

    /// Whether the sequence holds no acquisitions.
    pub fn is_empty(&self) -> bool {
        self.time_order.is_empty()
    }

    /// Acquisitions in the order they are taken.
    pub fn time_order(&self) -> &[Acquisition] {
        &self.time_order
    }

    /// Acquisitions sorted by ascending angle.
    pub fn sorted(&self) -> &[Acquisition] {
        &self.sorted
    }

    /// Time-order angles made phase-continuous.
    pub fn unwrapped(&self) -> &[f64] {
        &self.unwrapped
    }

    /// Time-order angles.
    pub fn angles(&self) -> Vec<f64> {
        self.time_order.iter().map(|a| a.angle).collect()
    }

    /// Angles in ascending order.
    pub fn sorted_angles(&self) -> Vec<f64> {
        self.sorted.iter().map(|a| a.angle).collect()
    }

    /// Angles of the requested view.
    pub fn ordered(&self, order: AcquisitionOrder) -> Vec<f64> {
        match order {
            AcquisitionOrder::Sorted => self.sorted_angles(),
            AcquisitionOrder::TimeOrder => self.angles(),
            AcquisitionOrder::Unwrapped => self.unwrapped.clone(),
        }
    }

    /// Number of different angles, compared exactly.
    pub fn distinct_angles(&self) -> usize {
        let mut angles = self.sorted_angles();
        angles.dedup();
        angles.len()
    }

    /// Number of acquisitions in each loop.
    pub fn loop_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.loops];
        for acq in &self.time_order {
            if let Some(c) = counts.get_mut(acq.loop_id) {
                *c += 1;
            }
        }
        counts
    }
}

/// Remove jumps larger than half a period between consecutive angles by
/// adding multiples of `period`.
pub fn unwrap_angles(angles: &[f64], period: f64) -> Vec<f64> {
    let half = period / 2.0;
    let mut out = Vec::with_capacity(angles.len());
    let mut correction = 0.0;
    for (i, &angle) in angles.iter().enumerate() {
        if i > 0 {
            let dd = angle - angles[i - 1];
            if dd.abs() >= half {
                let mut ddmod = (dd + half).rem_euclid(period) - half;
                if ddmod == -half && dd > 0.0 {
                    ddmod = half;
                }
                correction += ddmod - dd;
            }
        }
        out.push(angle + correction);
    }
    out
}
