//! Measurement Fusion.
//!
//! Combines any number of independent robot-pose [`Measurement`]s into one
//! by per-axis inverse-variance weighting:
//!
//! ```text
//! w_i   = 1 / σ_i²
//! x̂     = Σ w_i x_i / Σ w_i
//! σ̂     = sqrt(1 / Σ w_i)
//! ```
//!
//! x, y and theta are fused independently. Headings are unwrapped against
//! the first measurement before averaging, so sightings either side of ±π
//! average to ±π rather than to 0.
//!
//! # Example
//!
//! ```rust
//! use tagfuse_perception::fusion::{fuse, Measurement};
//!
//! let a = Measurement { x: 1.0, y: 0.0, theta: 0.0, x_sigma: 0.1, y_sigma: 1.0, theta_sigma: 0.5 };
//! let b = Measurement { x: 2.0, y: 0.0, theta: 0.0, x_sigma: 1.0, y_sigma: 1.0, theta_sigma: 0.5 };
//!
//! let fused = fuse(&[a, b]).unwrap();
//! assert!(fused.x < 1.1);
//! assert!(fused.y_sigma < 1.0);
//! ```

use std::f64::consts::{PI, TAU};

use tagfuse_types::OdometryDelta;

/// Floor applied to every sigma before it becomes a weight.
pub const MIN_SIGMA: f64 = 1e-9;

// ────────────────────────────────────────────────────────────────────────────
// Measurement
// ────────────────────────────────────────────────────────────────────────────

/// One independent estimate of the robot's field pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Field X (metres).
    pub x: f64,
    /// Field Y (metres).
    pub y: f64,
    /// Heading, counter-clockwise from field +X (radians).
    pub theta: f64,
    pub x_sigma: f64,
    pub y_sigma: f64,
    pub theta_sigma: f64,
}

impl Measurement {
    pub fn is_finite(&self) -> bool {
        [
            self.x,
            self.y,
            self.theta,
            self.x_sigma,
            self.y_sigma,
            self.theta_sigma,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Carry this pose forward by a robot-frame motion.
    ///
    /// Uncertainty grows by `per_metre` for every metre travelled and by
    /// `per_radian` for every radian turned, added in quadrature.
    pub fn predict(&self, motion: &OdometryDelta, per_metre: f64, per_radian: f64) -> Measurement {
        let (s, c) = self.theta.sin_cos();
        let travelled = motion.dx.hypot(motion.dy);
        let position_growth = per_metre * travelled;
        let heading_growth = per_radian * motion.dtheta.abs();
        Measurement {
            x: self.x + c * motion.dx - s * motion.dy,
            y: self.y + s * motion.dx + c * motion.dy,
            theta: normalize_angle(self.theta + motion.dtheta),
            x_sigma: self.x_sigma.hypot(position_growth),
            y_sigma: self.y_sigma.hypot(position_growth),
            theta_sigma: self.theta_sigma.hypot(heading_growth),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fusion
// ────────────────────────────────────────────────────────────────────────────

/// Wrap an angle into (−π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    let r = angle.rem_euclid(TAU);
    if r > PI { r - TAU } else { r }
}

/// Fuse `measurements` per axis by inverse variance.
///
/// Returns `None` when nothing finite is left to fuse.
pub fn fuse(measurements: &[Measurement]) -> Option<Measurement> {
    let mut usable = measurements.iter().filter(|m| m.is_finite());
    let first = usable.next()?;
    let reference = first.theta;

    let mut x = Accumulator::default();
    let mut y = Accumulator::default();
    let mut theta = Accumulator::default();

    for m in std::iter::once(first).chain(usable) {
        x.add(m.x, m.x_sigma);
        y.add(m.y, m.y_sigma);
        theta.add(reference + normalize_angle(m.theta - reference), m.theta_sigma);
    }

    let (x, x_sigma) = x.finish();
    let (y, y_sigma) = y.finish();
    let (theta, theta_sigma) = theta.finish();
    Some(Measurement {
        x,
        y,
        theta: normalize_angle(theta),
        x_sigma,
        y_sigma,
        theta_sigma,
    })
}

/// Running inverse-variance sums for one axis.
#[derive(Debug, Default)]
struct Accumulator {
    weighted: f64,
    weight: f64,
}

impl Accumulator {
    fn add(&mut self, value: f64, sigma: f64) {
        let sigma = sigma.abs().max(MIN_SIGMA);
        let w = 1.0 / (sigma * sigma);
        self.weighted += w * value;
        self.weight += w;
    }

    fn finish(&self) -> (f64, f64) {
        (self.weighted / self.weight, (1.0 / self.weight).sqrt())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
