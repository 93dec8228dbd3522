//! Camera model: lens intrinsics with Brown-Conrady distortion, and the
//! camera's static mounting offset on the robot.
//!
//! Frames used throughout the crate:
//!
//! - **robot / field**: x forward, y left, z up.
//! - **camera optical**: x right, y down, z forward along the lens axis.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use tagfuse_types::LocError;

/// Fixed-point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 20;

// ────────────────────────────────────────────────────────────────────────────
// Intrinsics
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole intrinsics plus radial (`k1`, `k2`) and tangential (`p1`, `p2`)
/// distortion, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    #[serde(default)]
    pub skew: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self {
            fx: 200.0,
            fy: 200.0,
            skew: 0.0,
            cx: 200.0,
            cy: 200.0,
            k1: -0.2,
            k2: 0.1,
            p1: 0.0,
            p2: 0.0,
        }
    }
}

impl Intrinsics {
    /// Mean focal length in pixels.
    pub fn focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }

    pub fn principal_point(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    /// Map an undistorted normalized image point to pixels.
    pub fn project(&self, p: [f64; 2]) -> [f64; 2] {
        let [x, y] = p;
        let (g, dx, dy) = self.distortion(x, y);
        let xd = g * x + dx;
        let yd = g * y + dy;
        [self.fx * xd + self.skew * yd + self.cx, self.fy * yd + self.cy]
    }

    /// Map a pixel to its undistorted normalized image point.
    pub fn undistort(&self, px: [f64; 2]) -> [f64; 2] {
        let yd = (px[1] - self.cy) / self.fy;
        let xd = (px[0] - self.cx - self.skew * yd) / self.fx;

        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let (g, dx, dy) = self.distortion(x, y);
            x = (xd - dx) / g;
            y = (yd - dy) / g;
        }
        [x, y]
    }

    /// Reject calibrations the solve cannot use.
    pub fn validate(&self) -> Result<(), LocError> {
        let all_finite = [
            self.fx, self.fy, self.skew, self.cx, self.cy, self.k1, self.k2, self.p1, self.p2,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite || self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(LocError::Config(format!("invalid camera intrinsics {self:?}")));
        }
        Ok(())
    }

    /// Radial gain and tangential offsets at normalized point `(x, y)`.
    fn distortion(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let r2 = x * x + y * y;
        let g = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (g, dx, dy)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Mount
// ────────────────────────────────────────────────────────────────────────────

/// Static pose of the camera body in the robot frame.
///
/// With all angles zero the camera looks along the robot's +x axis. Positive
/// `pitch` tilts the lens down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraMount {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
}

impl CameraMount {
    /// Pose of the camera optical frame in the robot frame.
    pub fn optical_pose(&self) -> Isometry3<f64> {
        let body = UnitQuaternion::from_euler_angles(self.roll, self.pitch, self.yaw);
        // Columns: optical x, y, z expressed in the camera body frame.
        let body_to_optical = Matrix3::new(
            0.0, 0.0, 1.0, //
            -1.0, 0.0, 0.0, //
            0.0, -1.0, 0.0,
        );
        let optical = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
            body_to_optical,
        ));
        Isometry3::from_parts(Translation3::new(self.x, self.y, self.z), body * optical)
    }

    /// Horizontal distance from the robot origin to the camera.
    pub fn lever_arm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CameraConfig
// ────────────────────────────────────────────────────────────────────────────

/// Everything the solve needs to know about one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub intrinsics: Intrinsics,
    pub mount: CameraMount,
    /// Standard deviation of each detected corner coordinate, in pixels.
    #[serde(default = "default_pixel_sigma")]
    pub pixel_sigma: f64,
}

fn default_pixel_sigma() -> f64 {
    1.0
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            intrinsics: Intrinsics::default(),
            mount: CameraMount {
                z: 1.0,
                ..Default::default()
            },
            pixel_sigma: default_pixel_sigma(),
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), LocError> {
        self.intrinsics.validate()?;
        if !(self.pixel_sigma.is_finite() && self.pixel_sigma > 0.0) {
            return Err(LocError::Config(format!(
                "pixel_sigma must be positive, got {}",
                self.pixel_sigma
            )));
        }
        Ok(())
    }
}
