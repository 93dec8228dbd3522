//! `tagfuse-perception` – the pose math.
//!
//! Turns pixel corners of known fiducial markers into robot poses on the
//! field, and fuses many such poses into one. Nothing here does I/O; every
//! function is a pure computation over its arguments.
//!
//! # Modules
//!
//! - [`field_map`] – [`FieldMap`][field_map::FieldMap]: surveyed marker
//!   poses keyed by id.
//! - [`camera`] – [`CameraConfig`][camera::CameraConfig]: lens intrinsics,
//!   distortion, and the camera's mount on the robot.
//! - [`geometry`] – [`solve`][geometry::solve] and
//!   [`measure`][geometry::measure]: single-marker perspective solve with a
//!   per-axis uncertainty model.
//! - [`fusion`] – [`fuse`][fusion::fuse]: per-axis inverse-variance
//!   combination of [`Measurement`][fusion::Measurement]s.

pub mod camera;
pub mod field_map;
pub mod fusion;
pub mod geometry;

pub use camera::{CameraConfig, CameraMount, Intrinsics};
pub use field_map::{FieldMap, Marker};
pub use fusion::{Measurement, fuse, normalize_angle};
pub use geometry::{Sighting, measure, solve};
