//! Single-marker pose solve.
//!
//! Turns the four pixel corners of one sighting into the marker's pose in
//! the camera frame, then into a robot-pose [`Measurement`] on the field.
//!
//! ```text
//! pixels ──undistort──▶ normalized ──homography──▶ camera_from_marker
//!                                                        │
//!   field_from_robot = field_from_marker · camera_from_marker⁻¹ · robot_from_camera⁻¹
//! ```
//!
//! Uncertainty comes from the raw pixel geometry rather than from the
//! solve: the smaller, more skewed and more off-centre the quad, the larger
//! the sigmas.

use std::f64::consts::SQRT_2;

use nalgebra::{
    Isometry3, Matrix3, Rotation3, SMatrix, SVector, Translation3, UnitQuaternion, Vector3,
};
use tagfuse_types::{LocError, Observation};

use crate::camera::CameraConfig;
use crate::field_map::Marker;
use crate::fusion::{Measurement, normalize_angle};

/// Quads smaller than this (px²) carry no usable pose.
pub const MIN_QUAD_AREA_PX: f64 = 4.0;

/// Result of solving one sighting in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sighting {
    /// Maps marker-frame points into the camera optical frame.
    pub camera_from_marker: Isometry3<f64>,
    /// Distance implied by the marker's apparent size (metres).
    pub apparent_range: f64,
    /// Along the line of sight (metres).
    pub range_sigma: f64,
    /// Direction of the line of sight (radians).
    pub bearing_sigma: f64,
    /// Rotation of the marker about its vertical axis (radians).
    pub yaw_sigma: f64,
}

/// Solve one sighting, then place the robot on the field.
pub fn measure(
    observation: &Observation,
    marker: &Marker,
    camera: &CameraConfig,
) -> Result<Measurement, LocError> {
    let sighting = solve(&observation.corners(), marker.size, camera)?;
    Ok(robot_measurement(&sighting, marker, camera))
}

/// Recover the marker pose from its four pixel corners.
///
/// Corners are in wire order (bottom-left, bottom-right, top-right,
/// top-left). Fails with [`LocError::DegenerateGeometry`] when the quad is
/// non-finite, too small, wound backwards, non-convex, or yields no pose.
pub fn solve(
    corners: &[[f64; 2]; 4],
    marker_size: f64,
    camera: &CameraConfig,
) -> Result<Sighting, LocError> {
    check_quad(corners)?;
    if !(marker_size.is_finite() && marker_size > 0.0) {
        return Err(degenerate(format!("marker size {marker_size}")));
    }

    let k = &camera.intrinsics;
    let image = corners.map(|px| k.undistort(px));
    let h = marker_size / 2.0;
    let object = [[-h, h], [h, h], [h, -h], [-h, -h]];

    let homography =
        homography_from_4pt(&object, &image).ok_or_else(|| degenerate("singular homography"))?;
    let camera_from_marker =
        pose_from_homography(&homography).ok_or_else(|| degenerate("no pose from homography"))?;

    // Uncertainty from the raw quad.
    let edge = |a: usize, b: usize| {
        let [ua, va] = corners[a];
        let [ub, vb] = corners[b];
        (ub - ua).hypot(vb - va)
    };
    let width = 0.5 * (edge(0, 1) + edge(2, 3));
    let height = 0.5 * (edge(1, 2) + edge(3, 0));
    let side = 0.5 * (width + height);

    let f = k.focal();
    let sigma = camera.pixel_sigma;
    let apparent_range = f * marker_size / side;

    let [cu, cv] = k.principal_point();
    let centroid_u = corners.iter().map(|c| c[0]).sum::<f64>() / 4.0;
    let centroid_v = corners.iter().map(|c| c[1]).sum::<f64>() / 4.0;
    let off_axis = (centroid_u - cu).hypot(centroid_v - cv) / f;
    let widen = (width.max(height) / width.min(height)) * (1.0 + off_axis * off_axis);

    Ok(Sighting {
        camera_from_marker,
        apparent_range,
        range_sigma: widen * apparent_range * (sigma / SQRT_2) / side,
        bearing_sigma: widen * (sigma / 2.0) / f,
        yaw_sigma: widen * (apparent_range / marker_size) * 2.0 * sigma / height,
    })
}

/// Place the robot on the field from a solved sighting.
pub fn robot_measurement(
    sighting: &Sighting,
    marker: &Marker,
    camera: &CameraConfig,
) -> Measurement {
    let field_from_camera = marker.field_pose() * sighting.camera_from_marker.inverse();
    let field_from_robot = field_from_camera * camera.mount.optical_pose().inverse();

    let position = field_from_robot.translation.vector;
    let rotation = field_from_robot.rotation.to_rotation_matrix();
    let r = rotation.matrix();
    let theta = normalize_angle(r[(1, 0)].atan2(r[(0, 0)]));

    // Line of sight in the horizontal plane, marker to camera.
    let camera_at = field_from_camera.translation.vector;
    let (dx, dy) = (camera_at.x - marker.x, camera_at.y - marker.y);
    let reach = dx.hypot(dy);
    let (ux, uy) = if reach > 1e-9 { (dx / reach, dy / reach) } else { (1.0, 0.0) };
    let (px, py) = (-uy, ux);

    let theta_var = sighting.bearing_sigma.powi(2) + sighting.yaw_sigma.powi(2);
    let lever_var = camera.mount.lever_arm().powi(2) * theta_var;
    let range_var = sighting.range_sigma.powi(2);
    // Swing about the marker, plus the independent range errors of the two
    // vertical edges whose foreshortening gives the yaw.
    let swing = sighting.apparent_range * sighting.yaw_sigma;
    let lateral_var = swing * swing + 2.0 * range_var;

    Measurement {
        x: position.x,
        y: position.y,
        theta,
        x_sigma: (range_var * ux * ux + lateral_var * px * px + lever_var).sqrt(),
        y_sigma: (range_var * uy * uy + lateral_var * py * py + lever_var).sqrt(),
        theta_sigma: theta_var.sqrt(),
    }
}

fn degenerate(reason: impl Into<String>) -> LocError {
    LocError::DegenerateGeometry(reason.into())
}

fn check_quad(corners: &[[f64; 2]; 4]) -> Result<(), LocError> {
    if corners.iter().flatten().any(|v| !v.is_finite()) {
        return Err(degenerate("non-finite corner"));
    }

    // Front-facing markers wind negatively in an image whose v axis points down.
    let twice_area: f64 = (0..4)
        .map(|i| {
            let [u0, v0] = corners[i];
            let [u1, v1] = corners[(i + 1) % 4];
            u0 * v1 - u1 * v0
        })
        .sum();
    let area = -0.5 * twice_area;
    if area.abs() < MIN_QUAD_AREA_PX {
        return Err(degenerate(format!("quad area {:.2} px²", area.abs())));
    }
    if area < 0.0 {
        return Err(degenerate("corners wound backwards"));
    }

    for i in 0..4 {
        let [u0, v0] = corners[i];
        let [u1, v1] = corners[(i + 1) % 4];
        let [u2, v2] = corners[(i + 2) % 4];
        let turn = (u1 - u0) * (v2 - v1) - (v1 - v0) * (u2 - u1);
        if turn >= 0.0 {
            return Err(degenerate("non-convex quad"));
        }
    }
    Ok(())
}

/// Homography `H` with `dst ~ H · src`, fixing `h33 = 1`.
fn homography_from_4pt(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Matrix3<f64>> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32]
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let [x, y] = src[k];
        let [u, v] = dst[k];

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    ))
}

/// Decompose a plane-to-normalized-image homography into a rigid pose.
fn pose_from_homography(h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let h1: Vector3<f64> = h.column(0).into_owned();
    let h2: Vector3<f64> = h.column(1).into_owned();
    let h3: Vector3<f64> = h.column(2).into_owned();

    let scale = 0.5 * (h1.norm() + h2.norm());
    if !scale.is_finite() || scale < 1e-12 {
        return None;
    }
    let (mut r1, mut r2, mut t) = (h1 / scale, h2 / scale, h3 / scale);
    // The marker must sit in front of the lens.
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    if t.z <= 0.0 {
        return None;
    }
    let r3 = r1.cross(&r2);

    let svd = Matrix3::from_columns(&[r1, r2, r3]).svd(true, true);
    let (mut u, v_t) = (svd.u?, svd.v_t?);
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        for i in 0..3 {
            u[(i, 2)] = -u[(i, 2)];
        }
        r = u * v_t;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Some(Isometry3::from_parts(Translation3::from(t), rotation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraMount, Intrinsics};
    use crate::field_map::BENCH_MARKER;
    use nalgebra::Point3;

    const HEAD_ON: [[f64; 2]; 4] = [
        [190.0, 210.0],
        [210.0, 210.0],
        [210.0, 190.0],
        [190.0, 190.0],
    ];

    /// Project the corners of a marker held at `camera_from_marker`.
    fn render(camera_from_marker: &Isometry3<f64>, size: f64, k: &Intrinsics) -> [[f64; 2]; 4] {
        let h = size / 2.0;
        [[-h, h], [h, h], [h, -h], [-h, -h]].map(|[x, y]| {
            let p = camera_from_marker * Point3::new(x, y, 0.0);
            k.project([p.x / p.z, p.y / p.z])
        })
    }

    #[test]
    fn head_on_sighting_solves_to_straight_ahead() {
        let camera = CameraConfig::default();
        let s = solve(&HEAD_ON, BENCH_MARKER.size, &camera).unwrap();

        let t = s.camera_from_marker.translation.vector;
        assert!(t.x.abs() < 1e-9 && t.y.abs() < 1e-9);
        assert!((t.z - 1.64935).abs() < 1e-4, "depth {}", t.z);
        assert!(s.camera_from_marker.rotation.angle() < 1e-6);

        assert!((s.apparent_range - 1.651).abs() < 1e-9);
        assert!((s.yaw_sigma - 1.0).abs() < 1e-9);
        assert!((s.bearing_sigma - 0.0025).abs() < 1e-12);
    }

    #[test]
    fn head_on_measurement_places_robot_on_the_axis() {
        let camera = CameraConfig::default();
        let m = measure(
            &Observation::from_corners(0, HEAD_ON),
            &BENCH_MARKER,
            &camera,
        )
        .unwrap();

        assert!((m.x - 2.35065).abs() < 1e-4, "x {}", m.x);
        assert!(m.y.abs() < 1e-9);
        assert!(m.theta.abs() < 1e-9);
        assert!((m.x_sigma - 0.058371).abs() < 1e-5);
        assert!((m.y_sigma - 1.653062).abs() < 1e-5, "y_sigma {}", m.y_sigma);
        assert!((m.theta_sigma - 1.0000031).abs() < 1e-6);
        // Range is better known than bearing at this distance.
        assert!(m.x_sigma < m.y_sigma);
    }

    #[test]
    fn lateral_sigma_carries_both_edge_ranges() {
        let camera = CameraConfig::default();
        let s = solve(&HEAD_ON, BENCH_MARKER.size, &camera).unwrap();
        let m = robot_measurement(&s, &BENCH_MARKER, &camera);

        let swing = s.apparent_range * s.yaw_sigma;
        let expected = (swing * swing + 2.0 * s.range_sigma * s.range_sigma).sqrt();
        assert!((m.y_sigma - expected).abs() < 1e-9);
        assert!(m.y_sigma > swing);
        assert!((1.6525..=1.6539).contains(&m.y_sigma), "y_sigma {}", m.y_sigma);
        assert!((0.0573..=0.0587).contains(&m.x_sigma), "x_sigma {}", m.x_sigma);
        assert!((0.9993..=1.0007).contains(&m.theta_sigma), "theta_sigma {}", m.theta_sigma);
    }

    #[test]
    fn rendered_pose_is_recovered() {
        let camera = CameraConfig::default();
        let truth = Isometry3::new(Vector3::new(0.3, -0.1, 2.0), Vector3::new(0.1, 0.4, 0.05));
        let corners = render(&truth, 0.2, &camera.intrinsics);

        let s = solve(&corners, 0.2, &camera).unwrap();
        let err = (s.camera_from_marker.translation.vector - truth.translation.vector).norm();
        assert!(err < 1e-6, "translation error {err}");
        assert!(s.camera_from_marker.rotation.angle_to(&truth.rotation) < 1e-6);
    }

    #[test]
    fn robot_pose_round_trips_through_the_camera() {
        let camera = CameraConfig {
            mount: CameraMount {
                x: 0.2,
                y: 0.1,
                z: 0.9,
                yaw: 0.1,
                ..Default::default()
            },
            ..CameraConfig::default()
        };
        // Robot at (1.5, 0.3), heading 0.2 rad.
        let field_from_robot =
            Isometry3::new(Vector3::new(1.5, 0.3, 0.0), Vector3::new(0.0, 0.0, 0.2));
        let camera_from_marker = (field_from_robot * camera.mount.optical_pose()).inverse()
            * BENCH_MARKER.field_pose();
        let corners = render(&camera_from_marker, BENCH_MARKER.size, &camera.intrinsics);

        let m = measure(
            &Observation::from_corners(0, corners),
            &BENCH_MARKER,
            &camera,
        )
        .unwrap();
        assert!((m.x - 1.5).abs() < 1e-6);
        assert!((m.y - 0.3).abs() < 1e-6);
        assert!((m.theta - 0.2).abs() < 1e-6);
    }

    #[test]
    fn smaller_quads_are_less_certain() {
        let camera = CameraConfig::default();
        let near = solve(&HEAD_ON, BENCH_MARKER.size, &camera).unwrap();
        let far = solve(
            &[[195.0, 205.0], [205.0, 205.0], [205.0, 195.0], [195.0, 195.0]],
            BENCH_MARKER.size,
            &camera,
        )
        .unwrap();
        assert!(far.range_sigma > near.range_sigma);
        assert!(far.yaw_sigma > near.yaw_sigma);
    }

    #[test]
    fn off_centre_and_skewed_quads_are_less_certain() {
        let camera = CameraConfig::default();
        let centred = solve(&HEAD_ON, BENCH_MARKER.size, &camera).unwrap();
        let shifted = HEAD_ON.map(|[u, v]| [u + 100.0, v]);
        let off = solve(&shifted, BENCH_MARKER.size, &camera).unwrap();
        assert!(off.range_sigma > centred.range_sigma);
        assert!(off.bearing_sigma > centred.bearing_sigma);

        let squashed = [[190.0, 205.0], [210.0, 205.0], [210.0, 195.0], [190.0, 195.0]];
        let skew = solve(&squashed, BENCH_MARKER.size, &camera).unwrap();
        assert!(skew.bearing_sigma > centred.bearing_sigma);
    }

    #[test]
    fn degenerate_quads_are_rejected() {
        let camera = CameraConfig::default();
        let size = BENCH_MARKER.size;
        let cases: [[[f64; 2]; 4]; 5] = [
            // collinear
            [[190.0, 200.0], [200.0, 200.0], [210.0, 200.0], [220.0, 200.0]],
            // all corners coincide
            [[200.0, 200.0]; 4],
            // tiny
            [[200.0, 201.0], [201.0, 201.0], [201.0, 200.0], [200.0, 200.0]],
            // bow-tie
            [[190.0, 210.0], [210.0, 190.0], [210.0, 210.0], [190.0, 190.0]],
            // mirrored winding
            [[190.0, 190.0], [210.0, 190.0], [210.0, 210.0], [190.0, 210.0]],
        ];
        for corners in cases {
            let err = solve(&corners, size, &camera).unwrap_err();
            assert!(matches!(err, LocError::DegenerateGeometry(_)), "{corners:?}");
        }

        let mut nan = HEAD_ON;
        nan[2][0] = f64::NAN;
        assert!(matches!(
            solve(&nan, size, &camera),
            Err(LocError::DegenerateGeometry(_))
        ));
        assert!(solve(&HEAD_ON, 0.0, &camera).is_err());
    }
}
