//! Golden-angle interlacing.
//!
//! Each of the `K` loops walks the span in steps of the golden angle
//! `span * (sqrt(5) - 1) / 2`, starting from its own offset. Loops are
//! acquired one after another. Angles of different loops can coincide, so
//! duplicates (compared after rounding to `dedup_decimals`) are dropped.
//!
//! With [`GoldenCount::PerLoop`] every loop takes `N` golden steps, so a scan
//! holds up to `K * N` projections. With [`GoldenCount::Split`] the `N`
//! projections are shared out between the loops and a loop keeps stepping
//! past duplicates until it has its share.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Acquisition, AngleSequence, Interlace, InterlaceMethod, SequenceParams};
use crate::error::{PsoError, PsoResult};

/// `(sqrt(5) - 1) / 2`
pub const GOLDEN_RATIO: f64 = 0.618_033_988_749_894_9;

/// Decimal places used when rounding Fibonacci offsets.
const OFFSET_DECIMALS: i32 = 5;

/// Golden steps a loop may take per projection before giving up on finding
/// unique angles.
const MAX_STEPS_PER_ANGLE: usize = 64;

/// How the start offset of each loop is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoldenOffsets {
    /// `k * span / K`
    #[default]
    Equal,
    /// `round(k / (N + 1) * span * golden_ratio, 5) mod span`
    Fibonacci,
}

impl GoldenOffsets {
    /// Offsets of all `K` loops in degrees.
    pub fn offsets(self, num_angles: usize, loops: usize, span: f64) -> Vec<f64> {
        (0..loops)
            .map(|k| match self {
                Self::Equal => k as f64 * span / loops as f64,
                Self::Fibonacci => {
                    let raw = k as f64 / (num_angles as f64 + 1.0) * span * GOLDEN_RATIO;
                    round_to(raw, OFFSET_DECIMALS).rem_euclid(span)
                }
            })
            .collect()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Number of projections each golden-angle loop takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoldenCount {
    /// `N` steps from every loop offset, angles already taken are dropped
    #[default]
    PerLoop,
    /// `N` split across the loops, exactly `N` unique angles in total
    Split,
}

/// Golden-angle interlacing policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoldenAngle {
    offsets: GoldenOffsets,
}

impl GoldenAngle {
    /// Golden-angle policy with the given loop offsets.
    pub fn new(offsets: GoldenOffsets) -> Self {
        Self { offsets }
    }

    /// Golden angle for `span`.
    pub fn golden_angle(span: f64) -> f64 {
        span * GOLDEN_RATIO
    }
}

impl Interlace for GoldenAngle {
    fn generate(&self, params: &SequenceParams) -> PsoResult<AngleSequence> {
        params.validate()?;

        let span = params.span;
        let step = Self::golden_angle(span);
        let offsets = self.offsets.offsets(params.num_angles, params.loops, span);
        let scale = 10f64.powi(params.dedup_decimals.min(12) as i32);

        let capacity = match params.golden_count {
            GoldenCount::PerLoop => params.num_angles.saturating_mul(params.loops),
            GoldenCount::Split => params.num_angles,
        };
        let mut seen = HashSet::with_capacity(capacity);
        let mut acquisitions = Vec::with_capacity(capacity);
        let mut skipped = 0usize;

        for (loop_id, &offset) in offsets.iter().enumerate() {
            let (share, max_steps) = match params.golden_count {
                GoldenCount::PerLoop => (params.num_angles, params.num_angles),
                GoldenCount::Split => {
                    let share = params.loop_share(loop_id);
                    let steps = share
                        .saturating_mul(MAX_STEPS_PER_ANGLE)
                        .max(MAX_STEPS_PER_ANGLE);
                    (share, steps)
                }
            };
            let mut taken = 0;
            let mut i = 0usize;
            while taken < share && i < max_steps {
                let angle = params.start + (offset + i as f64 * step).rem_euclid(span);
                i += 1;
                if seen.insert((angle * scale).round() as i64) {
                    acquisitions.push(Acquisition { angle, loop_id });
                    taken += 1;
                } else {
                    skipped += 1;
                }
            }
            if params.golden_count == GoldenCount::Split && taken < share {
                return Err(PsoError::Configuration(format!(
                    "golden-angle loop {loop_id} found only {taken} of {share} unique angles \
                     at {} decimals",
                    params.dedup_decimals
                )));
            }
        }

        debug!(
            num_angles = params.num_angles,
            loops = params.loops,
            offsets = ?offsets,
            count = ?params.golden_count,
            generated = acquisitions.len(),
            skipped,
            "Generated golden-angle sequence"
        );

        let method = match self.offsets {
            GoldenOffsets::Equal => InterlaceMethod::GoldenAngle,
            GoldenOffsets::Fibonacci => InterlaceMethod::FibonacciOffset,
        };
        Ok(AngleSequence::new(method, params.loops, span, acquisitions))
    }
}
