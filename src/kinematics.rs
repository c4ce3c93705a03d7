//! Kinematic Profile Simulator
//!
//! Symmetric trapezoidal motion of the rotation stage: a constant-acceleration
//! ramp to the scan velocity, a plateau, and the mirrored deceleration ramp.
//!
//! [`TrapezoidalProfile`] evaluates the motion in closed form. For the
//! realizable-angle correction the profile is sampled into a [`MotionTable`]
//! at a fixed step `dt`; requested angles are looked up in the table,
//! snapped to the nearest motion sample, and projected back to the angle the
//! stage actually occupies at that instant.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PsoError, PsoResult};

/// Regime of the trapezoidal profile at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionPhase {
    /// Constant acceleration from rest
    Accelerating,
    /// Constant velocity
    Plateau,
    /// Constant deceleration to rest
    Decelerating,
}

/// Trapezoidal velocity profile over a fixed angular span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrapezoidalProfile {
    acceleration: f64,
    velocity: f64,
    span: f64,
}

impl TrapezoidalProfile {
    /// Profile reaching `velocity` (deg/s) with `acceleration` (deg/s²) and
    /// sweeping `span` degrees in total.
    ///
    /// # Errors
    ///
    /// `Configuration` for non-positive inputs, `ProfileInfeasible` when the two
    /// ramps alone cover the span.
    pub fn new(acceleration: f64, velocity: f64, span: f64) -> PsoResult<Self> {
        for (name, value) in [
            ("acceleration", acceleration),
            ("velocity", velocity),
            ("span", span),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(PsoError::Configuration(format!(
                    "motion {name} must be > 0, got {value}"
                )));
            }
        }

        let profile = Self {
            acceleration,
            velocity,
            span,
        };
        let ramp_angle = 2.0 * profile.accel_angle();
        if ramp_angle >= span {
            return Err(PsoError::ProfileInfeasible { ramp_angle, span });
        }
        Ok(profile)
    }

    /// Profile whose ramps last `accel_time` seconds.
    pub fn from_accel_time(velocity: f64, accel_time: f64, span: f64) -> PsoResult<Self> {
        if !(accel_time.is_finite() && accel_time > 0.0) {
            return Err(PsoError::Configuration(format!(
                "accel_time must be > 0, got {accel_time}"
            )));
        }
        Self::new(velocity / accel_time, velocity, span)
    }

    /// Acceleration in deg/s².
    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Plateau velocity in deg/s.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Total travel in degrees.
    pub fn span(&self) -> f64 {
        self.span
    }

    /// Duration of one ramp, `T_acc = ω / a`.
    pub fn accel_time(&self) -> f64 {
        self.velocity / self.acceleration
    }

    /// Angle swept by one ramp, `½ a T_acc²`.
    pub fn accel_angle(&self) -> f64 {
        let t = self.accel_time();
        0.5 * self.acceleration * t * t
    }

    /// Angle swept at constant velocity.
    pub fn plateau_angle(&self) -> f64 {
        self.span - 2.0 * self.accel_angle()
    }

    /// Time spent at constant velocity, in seconds.
    pub fn plateau_time(&self) -> f64 {
        self.plateau_angle() / self.velocity
    }

    /// Time from rest to rest.
    pub fn total_time(&self) -> f64 {
        2.0 * self.accel_time() + self.plateau_time()
    }

    /// Regime at time `t`. Times outside the motion belong to the nearest ramp.
    pub fn phase_at(&self, t: f64) -> MotionPhase {
        let t_acc = self.accel_time();
        if t < t_acc {
            MotionPhase::Accelerating
        } else if t <= t_acc + self.plateau_time() {
            MotionPhase::Plateau
        } else {
            MotionPhase::Decelerating
        }
    }

    /// Swept angle at time `t`, clamped to `[0, span]` outside the motion.
    pub fn angle_at(&self, t: f64) -> f64 {
        let total = self.total_time();
        if t <= 0.0 {
            return 0.0;
        }
        if t >= total {
            return self.span;
        }
        let t_acc = self.accel_time();
        match self.phase_at(t) {
            MotionPhase::Accelerating => 0.5 * self.acceleration * t * t,
            MotionPhase::Plateau => self.accel_angle() + self.velocity * (t - t_acc),
            MotionPhase::Decelerating => {
                let remaining = total - t;
                self.span - 0.5 * self.acceleration * remaining * remaining
            }
        }
    }

    /// Angular velocity at time `t`.
    pub fn velocity_at(&self, t: f64) -> f64 {
        let total = self.total_time();
        if t <= 0.0 || t >= total {
            return 0.0;
        }
        match self.phase_at(t) {
            MotionPhase::Accelerating => self.acceleration * t,
            MotionPhase::Plateau => self.velocity,
            MotionPhase::Decelerating => self.acceleration * (total - t),
        }
    }

    /// Closed-form inverse of [`angle_at`](Self::angle_at).
    ///
    /// # Errors
    ///
    /// `Range` when `angle` lies outside `[0, span]`.
    pub fn time_at(&self, angle: f64) -> PsoResult<f64> {
        if !(0.0..=self.span).contains(&angle) {
            return Err(PsoError::Range {
                angle,
                min: 0.0,
                max: self.span,
            });
        }
        let accel_angle = self.accel_angle();
        let t = if angle < accel_angle {
            (2.0 * angle / self.acceleration).sqrt()
        } else if angle <= self.span - accel_angle {
            self.accel_time() + (angle - accel_angle) / self.velocity
        } else {
            self.total_time() - (2.0 * (self.span - angle) / self.acceleration).sqrt()
        };
        Ok(t)
    }

    /// Sample the profile every `dt` seconds.
    ///
    /// Each phase is sampled on its own local clock and chained onto the end
    /// of the previous one. The final sample is always `(total_time, span)`.
    ///
    /// # Errors
    ///
    /// `Configuration` when `dt` is not positive or the table would exceed
    /// `max_samples` entries.
    pub fn sample(&self, dt: f64, max_samples: usize) -> PsoResult<MotionTable> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PsoError::Configuration(format!(
                "motion dt must be > 0, got {dt}"
            )));
        }
        let total = self.total_time();
        let estimate = (total / dt).ceil() + 4.0;
        if estimate > max_samples as f64 {
            return Err(PsoError::Configuration(format!(
                "motion table needs about {estimate:.0} samples at dt = {dt}, limit is {max_samples}"
            )));
        }

        let t_acc = self.accel_time();
        let t_flat = self.plateau_time();
        let phases = [(0.0, t_acc), (t_acc, t_flat), (t_acc + t_flat, t_acc)];

        let mut table = MotionTable::with_capacity(dt, estimate as usize);
        for (offset, duration) in phases {
            let mut i = 0u64;
            loop {
                let local = i as f64 * dt;
                if local >= duration {
                    break;
                }
                let t = offset + local;
                table.push(t, self.angle_at(t));
                i += 1;
            }
        }
        table.finish(total, self.span);

        debug!(
            samples = table.len(),
            accel_time = t_acc,
            accel_angle = self.accel_angle(),
            plateau_angle = self.plateau_angle(),
            total_time = total,
            "Sampled trapezoidal profile"
        );
        Ok(table)
    }
}

/// Time and angle samples of a motion, both strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionTable {
    dt: f64,
    times: Vec<f64>,
    angles: Vec<f64>,
}

impl MotionTable {
    fn with_capacity(dt: f64, capacity: usize) -> Self {
        Self {
            dt,
            times: Vec::with_capacity(capacity),
            angles: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample, dropping it unless both coordinates advance.
    fn push(&mut self, t: f64, angle: f64) {
        let advances = match (self.times.last(), self.angles.last()) {
            (Some(&last_t), Some(&last_angle)) => t > last_t && angle > last_angle,
            _ => true,
        };
        if advances {
            self.times.push(t);
            self.angles.push(angle);
        }
    }

    /// Force the last sample onto the end of the motion.
    fn finish(&mut self, total_time: f64, span: f64) {
        while matches!(
            (self.times.last(), self.angles.last()),
            (Some(&t), Some(&a)) if t >= total_time || a >= span
        ) {
            self.times.pop();
            self.angles.pop();
        }
        self.times.push(total_time);
        self.angles.push(span);
    }

    /// Sampling step used to build the table.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether the table holds no samples.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Sample times in seconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Sample angles in degrees.
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// Total duration covered by the table.
    pub fn duration(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Total angle covered by the table.
    pub fn span(&self) -> f64 {
        self.angles.last().copied().unwrap_or(0.0)
    }

    /// Angle at time `t` by linear interpolation, clamped at both ends.
    pub fn angle_of(&self, t: f64) -> f64 {
        interp(t, &self.times, &self.angles)
    }

    /// Time at which the stage passes `angle`, by linear interpolation.
    ///
    /// # Errors
    ///
    /// `Range` when `angle` lies outside the simulated motion.
    pub fn time_of(&self, angle: f64) -> PsoResult<f64> {
        let (min, max) = (self.angles.first(), self.angles.last());
        match (min, max) {
            (Some(&min), Some(&max)) if (min..=max).contains(&angle) => {
                Ok(interp(angle, &self.angles, &self.times))
            }
            _ => Err(PsoError::Range {
                angle,
                min: min.copied().unwrap_or(0.0),
                max: max.copied().unwrap_or(0.0),
            }),
        }
    }

    /// Index of the sample closest in time to `t`.
    fn nearest_sample(&self, t: f64) -> usize {
        let upper = self.times.partition_point(|&x| x < t);
        if upper == 0 {
            return 0;
        }
        if upper >= self.times.len() {
            return self.times.len() - 1;
        }
        if t - self.times[upper - 1] <= self.times[upper] - t {
            upper - 1
        } else {
            upper
        }
    }

    /// Resolve each requested angle to the motion sample at which the stage
    /// actually passes it.
    ///
    /// # Errors
    ///
    /// `Range` for the first angle outside the simulated motion.
    pub fn real_motion(&self, ideal: &[f64]) -> PsoResult<RealMotion> {
        let mut times = Vec::with_capacity(ideal.len());
        let mut angles = Vec::with_capacity(ideal.len());
        for &angle in ideal {
            let idx = self.nearest_sample(self.time_of(angle)?);
            times.push(self.times[idx]);
            angles.push(self.angles[idx]);
        }
        Ok(RealMotion {
            ideal: ideal.to_vec(),
            times,
            angles,
        })
    }
}

/// Requested angles next to the instants and angles the stage realizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealMotion {
    /// Requested angles
    pub ideal: Vec<f64>,
    /// Realized trigger times
    pub times: Vec<f64>,
    /// Realized angles
    pub angles: Vec<f64>,
}

impl RealMotion {
    /// Largest `|real - ideal|` in degrees.
    pub fn max_angle_error(&self) -> f64 {
        self.ideal
            .iter()
            .zip(&self.angles)
            .map(|(ideal, real)| (real - ideal).abs())
            .fold(0.0, f64::max)
    }
}

/// One-dimensional linear interpolation over strictly increasing `xs`,
/// clamping to the end values outside the table.
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let hi = xs[..n].partition_point(|&v| v <= x).min(n - 1);
    let lo = hi - 1;
    let (x0, x1) = (xs[lo], xs[hi]);
    let (y0, y1) = (ys[lo], ys[hi]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_profile() -> TrapezoidalProfile {
        TrapezoidalProfile::new(66.7, 10.0, 360.0).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let profile = reference_profile();
        assert!((profile.accel_time() - 0.15).abs() < 1e-3);
        assert!((profile.accel_angle() - 0.75).abs() < 1e-3);
        assert!((profile.plateau_angle() - 358.5).abs() < 1e-2);
    }

    #[test]
    fn test_from_accel_time() {
        let profile = TrapezoidalProfile::from_accel_time(10.0, 0.15, 360.0).unwrap();
        assert!((profile.acceleration() - 66.666_666).abs() < 1e-3);
        assert!((profile.accel_time() - 0.15).abs() < 1e-12);
        assert!((profile.accel_angle() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_infeasible_profile() {
        // 2 s ramps at 10 deg/s sweep 20 deg, more than the 15 deg span
        let err = TrapezoidalProfile::new(5.0, 10.0, 15.0).unwrap_err();
        match err {
            PsoError::ProfileInfeasible { ramp_angle, span } => {
                assert!((ramp_angle - 20.0).abs() < 1e-12);
                assert_eq!(span, 15.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Ramps exactly filling the span leave no plateau
        assert!(TrapezoidalProfile::new(5.0, 10.0, 20.0).is_err());
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            TrapezoidalProfile::new(0.0, 10.0, 360.0),
            Err(PsoError::Configuration(_))
        ));
        assert!(TrapezoidalProfile::from_accel_time(10.0, 0.0, 360.0).is_err());
    }

    #[test]
    fn test_endpoints_and_phases() {
        let profile = reference_profile();
        let total = profile.total_time();
        assert_eq!(profile.angle_at(0.0), 0.0);
        assert_eq!(profile.angle_at(total), 360.0);
        assert_eq!(profile.phase_at(0.05), MotionPhase::Accelerating);
        assert_eq!(profile.phase_at(10.0), MotionPhase::Plateau);
        assert_eq!(profile.phase_at(total - 0.01), MotionPhase::Decelerating);
        assert_eq!(profile.velocity_at(10.0), 10.0);
        assert_eq!(profile.velocity_at(total + 1.0), 0.0);
    }

    #[test]
    fn test_closed_form_inverse() {
        let profile = reference_profile();
        for &t in &[0.0, 0.01, 0.1, 0.2, 5.0, 30.0, profile.total_time() - 0.05] {
            let back = profile.time_at(profile.angle_at(t)).unwrap();
            assert!((back - t).abs() < 1e-9, "t = {t}, back = {back}");
        }
        assert!(matches!(
            profile.time_at(360.5),
            Err(PsoError::Range { .. })
        ));
    }

    #[test]
    fn test_sampled_table_is_strictly_monotonic() {
        let profile = reference_profile();
        let table = profile.sample(1e-3, 1_000_000).unwrap();
        assert_eq!(table.times()[0], 0.0);
        assert_eq!(table.angles()[0], 0.0);
        assert_eq!(table.duration(), profile.total_time());
        assert_eq!(table.span(), 360.0);
        assert!(table.times().windows(2).all(|w| w[0] < w[1]));
        assert!(table.angles().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_round_trip_within_dt() {
        let profile = reference_profile();
        let dt = 1e-3;
        let table = profile.sample(dt, 1_000_000).unwrap();
        let total = profile.total_time();
        for i in 0..=200 {
            let t = total * i as f64 / 200.0;
            let back = table.time_of(table.angle_of(t)).unwrap();
            assert!((back - t).abs() <= dt, "t = {t}, back = {back}");
        }
    }

    #[test]
    fn test_sample_limit() {
        let profile = reference_profile();
        let err = profile.sample(1e-4, 1000).unwrap_err();
        assert!(err.to_string().contains("limit is 1000"));
    }

    #[test]
    fn test_real_motion_snaps_to_samples() {
        let profile = reference_profile();
        let dt = 1e-3;
        let table = profile.sample(dt, 1_000_000).unwrap();
        let ideal = [1.0, 90.0, 180.123, 359.0];
        let real = table.real_motion(&ideal).unwrap();
        assert_eq!(real.angles.len(), 4);
        for (r, t) in real.angles.iter().zip(&real.times) {
            assert!(table.angles().contains(r));
            assert!(table.times().contains(t));
        }
        // Plateau velocity bounds how far a snapped angle can move
        assert!(real.max_angle_error() <= 10.0 * dt);
    }

    #[test]
    fn test_real_motion_out_of_range() {
        let table = reference_profile().sample(1e-2, 100_000).unwrap();
        let err = table.real_motion(&[10.0, 400.0]).unwrap_err();
        assert!(matches!(err, PsoError::Range { angle, .. } if angle == 400.0));
        assert!(table.real_motion(&[-1.0]).is_err());
    }

    #[test]
    fn test_interp() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [0.0, 10.0, 30.0];
        assert_eq!(interp(0.5, &xs, &ys), 5.0);
        assert_eq!(interp(1.5, &xs, &ys), 20.0);
        assert_eq!(interp(-1.0, &xs, &ys), 0.0);
        assert_eq!(interp(3.0, &xs, &ys), 30.0);
        assert_eq!(interp(1.0, &xs, &ys), 10.0);
    }
}
