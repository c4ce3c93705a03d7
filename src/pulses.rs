//! Pulse Quantizer & Delay Generator
//!
//! Converts acquisition angles into encoder pulse counts and the delay list
//! loaded into the PSO pulse-sequence memory. The trigger generator only
//! counts up, so every delay must be strictly positive; a non-positive
//! difference between consecutive pulses is lifted by one revolution of
//! encoder counts, and anything still non-positive after that aborts.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PsoError, PsoResult};

/// Where encoder count zero sits along the motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseReference {
    /// Counting starts where the stage starts moving
    #[default]
    TaxiStart,
    /// Counting starts at the requested rotation start
    Zero,
}

/// One angle after quantization to encoder counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizedAngle {
    /// Requested angle (degrees)
    pub target: f64,
    /// Nearest encoder count
    pub pulse: i64,
    /// Angle that count corresponds to
    pub actual: f64,
    /// `actual - target`
    pub error: f64,
}

/// Maps angles to encoder counts for a given encoder resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseQuantizer {
    counts_per_rotation: u32,
}

impl PulseQuantizer {
    /// Quantizer for an encoder with `counts_per_rotation` counts per revolution.
    ///
    /// # Errors
    ///
    /// `Configuration` when `counts_per_rotation` is zero.
    pub fn new(counts_per_rotation: u32) -> PsoResult<Self> {
        if counts_per_rotation == 0 {
            return Err(PsoError::Configuration(
                "counts_per_rotation must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            counts_per_rotation,
        })
    }

    /// Encoder counts per full rotation.
    pub fn counts_per_rotation(&self) -> u32 {
        self.counts_per_rotation
    }

    /// Encoder counts per degree.
    pub fn counts_per_degree(&self) -> f64 {
        f64::from(self.counts_per_rotation) / 360.0
    }

    /// Nearest encoder count to `angle`, ties rounded away from zero.
    pub fn pulse_count(&self, angle: f64) -> i64 {
        (angle * self.counts_per_degree()).round() as i64
    }

    /// Pulse counts of all `angles`.
    pub fn quantize(&self, angles: &[f64]) -> Vec<i64> {
        angles.iter().map(|&a| self.pulse_count(a)).collect()
    }

    /// Angle a pulse count corresponds to.
    pub fn actual_angle(&self, pulse: i64) -> f64 {
        pulse as f64 / self.counts_per_degree()
    }

    /// Per-angle quantization report.
    pub fn report(&self, angles: &[f64]) -> Vec<QuantizedAngle> {
        angles
            .iter()
            .map(|&target| {
                let pulse = self.pulse_count(target);
                let actual = self.actual_angle(pulse);
                QuantizedAngle {
                    target,
                    pulse,
                    actual,
                    error: actual - target,
                }
            })
            .collect()
    }

    /// Quantize `angles` and build the delay schedule.
    pub fn schedule(&self, angles: &[f64], leading_offset: bool) -> PsoResult<PulseSchedule> {
        PulseSchedule::from_pulses(self.quantize(angles), self.counts_per_rotation, leading_offset)
    }
}

/// Differences between consecutive pulses, led by the first pulse itself.
pub fn raw_deltas(pulses: &[i64]) -> Vec<i64> {
    let mut deltas = Vec::with_capacity(pulses.len());
    let mut previous = 0;
    for &p in pulses {
        deltas.push(p - previous);
        previous = p;
    }
    deltas
}

/// Lift a non-positive delay by one revolution.
fn correct_delay(index: usize, delay: i64, counts_per_rotation: i64) -> PsoResult<(i64, bool)> {
    if delay > 0 {
        return Ok((delay, false));
    }
    let lifted = delay + counts_per_rotation;
    if lifted <= 0 {
        return Err(PsoError::NonMonotonicPulse {
            index,
            delay: lifted,
        });
    }
    Ok((lifted, true))
}

/// Final trigger schedule handed to the pulse generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseSchedule {
    raw_pulses: Vec<i64>,
    pulses: Vec<u32>,
    raw_deltas: Vec<i64>,
    delays: Vec<u32>,
    offset: u32,
    wraps: usize,
    leading_offset: bool,
}

impl PulseSchedule {
    /// Build the schedule from absolute pulse counts.
    ///
    /// With `leading_offset` the first delay is the first pulse itself and
    /// there are `N` delays. Otherwise the first pulse, folded into one
    /// revolution, becomes [`offset`](Self::offset) and there are `N - 1`
    /// delays.
    ///
    /// # Errors
    ///
    /// `NonMonotonicPulse` when a delay stays non-positive after the
    /// one-revolution correction, `PulseOverflow` when a hardware-domain
    /// pulse does not fit 32 bits.
    pub fn from_pulses(
        raw_pulses: Vec<i64>,
        counts_per_rotation: u32,
        leading_offset: bool,
    ) -> PsoResult<Self> {
        if raw_pulses.is_empty() {
            return Err(PsoError::Configuration(
                "cannot build a pulse schedule without pulses".to_string(),
            ));
        }
        let cpr = i64::from(counts_per_rotation);
        let raw_deltas = raw_deltas(&raw_pulses);

        let mut corrected = Vec::with_capacity(raw_deltas.len());
        let mut wraps = 0;
        let skip = usize::from(!leading_offset);
        for (index, &delta) in raw_deltas.iter().enumerate().skip(skip) {
            let (delay, wrapped) = correct_delay(index, delta, cpr)?;
            if wrapped {
                wraps += 1;
                debug!(index, raw = delta, corrected = delay, "Delay lifted by one revolution");
            }
            corrected.push(delay);
        }

        let offset = if leading_offset {
            corrected[0]
        } else {
            raw_pulses[0].rem_euclid(cpr.max(1))
        };

        let mut pulses = Vec::with_capacity(raw_pulses.len());
        let mut cumulative = offset;
        let mut push = |index: usize, value: i64| -> PsoResult<()> {
            let value = u32::try_from(value).map_err(|_| PsoError::PulseOverflow { index, value })?;
            pulses.push(value);
            Ok(())
        };
        push(0, cumulative)?;
        for (i, &delay) in corrected.iter().enumerate().skip(usize::from(leading_offset)) {
            cumulative += delay;
            push(i + skip, cumulative)?;
        }

        let delays = corrected
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                u32::try_from(d).map_err(|_| PsoError::PulseOverflow {
                    index: i + skip,
                    value: d,
                })
            })
            .collect::<PsoResult<Vec<u32>>>()?;
        let offset = u32::try_from(offset).map_err(|_| PsoError::PulseOverflow {
            index: 0,
            value: offset,
        })?;

        if wraps > 0 {
            warn!(wraps, "Pulse sequence wrapped across revolutions");
        }

        Ok(Self {
            raw_pulses,
            pulses,
            raw_deltas,
            delays,
            offset,
            wraps,
            leading_offset,
        })
    }

    /// Pulse counts as computed from the angles.
    pub fn raw_pulses(&self) -> &[i64] {
        &self.raw_pulses
    }

    /// Cumulative pulse counts in the hardware domain, strictly increasing.
    pub fn pulses(&self) -> &[u32] {
        &self.pulses
    }

    /// Uncorrected differences, led by the first pulse.
    pub fn raw_deltas(&self) -> &[i64] {
        &self.raw_deltas
    }

    /// Strictly positive delays for the pulse-sequence memory.
    pub fn delays(&self) -> &[u32] {
        &self.delays
    }

    /// Counts from the reference to the first trigger.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Number of delays lifted by one revolution.
    pub fn wraps(&self) -> usize {
        self.wraps
    }

    /// Whether the first delay is the offset from the reference to the first pulse.
    pub fn has_leading_offset(&self) -> bool {
        self.leading_offset
    }

    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// Whether the schedule holds no pulses.
    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Hardware count of the last trigger.
    pub fn total_span(&self) -> u64 {
        self.pulses.last().map_or(0, |&p| u64::from(p))
    }

    /// Delays as little-endian `u32` words.
    pub fn to_le_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.delays.len() * 4);
        for &delay in &self.delays {
            buf.put_u32_le(delay);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_scenario() {
        let schedule = PulseSchedule::from_pulses(vec![5, 3, 9], 20_000, true).unwrap();
        assert_eq!(schedule.raw_deltas(), &[5, -2, 6]);
        assert_eq!(schedule.delays(), &[5, 19_998, 6]);
        assert_eq!(schedule.pulses(), &[5, 20_003, 20_009]);
        assert_eq!(schedule.wraps(), 1);
        assert_eq!(schedule.offset(), 5);
    }

    #[test]
    fn test_delays_sum_to_last_pulse() {
        for leading in [true, false] {
            let schedule =
                PulseSchedule::from_pulses(vec![120, 40, 300, 10, 200], 1000, leading).unwrap();
            let sum: u64 = schedule.delays().iter().map(|&d| u64::from(d)).sum();
            let offset = if leading { 0 } else { u64::from(schedule.offset()) };
            assert_eq!(sum + offset, schedule.total_span());
            assert!(schedule.delays().iter().all(|&d| d > 0));
            assert!(schedule.pulses().windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_without_leading_offset() {
        let schedule = PulseSchedule::from_pulses(vec![25_000, 25_100, 25_300], 20_000, false)
            .unwrap();
        assert_eq!(schedule.delays(), &[100, 200]);
        assert_eq!(schedule.offset(), 5_000);
        assert_eq!(schedule.pulses(), &[5_000, 5_100, 5_300]);
        assert!(!schedule.has_leading_offset());
    }

    #[test]
    fn test_non_monotonic_after_correction() {
        let err = PulseSchedule::from_pulses(vec![10, 50_000, 10], 20_000, true).unwrap_err();
        assert!(matches!(
            err,
            PsoError::NonMonotonicPulse { index: 2, delay: -29_990 }
        ));
    }

    #[test]
    fn test_zero_delay_is_lifted() {
        let schedule = PulseSchedule::from_pulses(vec![7, 7], 100, true).unwrap();
        assert_eq!(schedule.delays(), &[7, 100]);
    }

    #[test]
    fn test_leading_offset_wraps_negative_first_pulse() {
        let schedule = PulseSchedule::from_pulses(vec![-5, 10], 100, true).unwrap();
        assert_eq!(schedule.delays(), &[95, 15]);
        assert_eq!(schedule.pulses(), &[95, 110]);
    }

    #[test]
    fn test_overflow() {
        let err = PulseSchedule::from_pulses(vec![i64::from(u32::MAX) + 10], u32::MAX, true)
            .unwrap_err();
        assert!(matches!(err, PsoError::PulseOverflow { index: 0, .. }));
    }

    #[test]
    fn test_quantizer_rounding() {
        let coarse = PulseQuantizer::new(360).unwrap();
        assert_eq!(coarse.pulse_count(0.5), 1);
        assert_eq!(coarse.pulse_count(-0.5), -1);
        assert_eq!(coarse.pulse_count(2.49), 2);

        let q = PulseQuantizer::new(20_000).unwrap();
        assert_eq!(q.pulse_count(11.25), 625);
        assert_eq!(q.quantize(&[0.0, 90.0, 180.0]), vec![0, 5_000, 10_000]);
        assert!(PulseQuantizer::new(0).is_err());
    }

    #[test]
    fn test_report() {
        let q = PulseQuantizer::new(360).unwrap();
        let report = q.report(&[10.2, 20.0]);
        assert_eq!(report[0].pulse, 10);
        assert_eq!(report[0].actual, 10.0);
        assert!((report[0].error + 0.2).abs() < 1e-9);
        assert_eq!(report[1].error, 0.0);
    }

    #[test]
    fn test_le_bytes() {
        let schedule = PulseSchedule::from_pulses(vec![1, 258], 20_000, true).unwrap();
        assert_eq!(
            schedule.to_le_bytes().as_ref(),
            &[1, 0, 0, 0, 1, 1, 0, 0]
        );
    }

    #[test]
    fn test_schedule_from_angles() {
        let q = PulseQuantizer::new(20_000).unwrap();
        let schedule = q.schedule(&[0.09, 0.054, 0.162], true).unwrap();
        assert_eq!(schedule.raw_pulses(), &[5, 3, 9]);
        assert_eq!(schedule.delays(), &[5, 19_998, 6]);
    }
}
