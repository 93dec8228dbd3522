//! Surveyed positions of the fiducial markers on the field.

use std::collections::HashMap;

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tagfuse_types::LocError;

/// One vertical marker.
///
/// `(x, y, z)` is the marker centre in the field frame. `yaw` is the
/// direction its printed face points, counter-clockwise from field +X.
/// `size` is the black-border edge length in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub size: f64,
}

impl Marker {
    /// Pose of the marker's optical frame in the field: x to the right and
    /// y down as seen by a viewer facing it, z into the printed face.
    pub fn field_pose(&self) -> Isometry3<f64> {
        let (s, c) = self.yaw.sin_cos();
        let x_axis = Vector3::new(-s, c, 0.0);
        let y_axis = Vector3::new(0.0, 0.0, -1.0);
        let z_axis = Vector3::new(-c, -s, 0.0);
        let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[
            x_axis, y_axis, z_axis,
        ]));
        Isometry3::from_parts(
            Translation3::new(self.x, self.y, self.z),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }

    fn validate(&self) -> Result<(), LocError> {
        let finite = [self.x, self.y, self.z, self.yaw].iter().all(|v| v.is_finite());
        if !finite {
            return Err(LocError::Config(format!("marker {} has a non-finite pose", self.id)));
        }
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(LocError::Config(format!(
                "marker {} has invalid size {}",
                self.id, self.size
            )));
        }
        Ok(())
    }
}

/// The bench field: one 6.5-inch marker 4 m ahead of the origin, 1 m up,
/// facing back toward it.
pub const BENCH_MARKER: Marker = Marker {
    id: 0,
    x: 4.0,
    y: 0.0,
    z: 1.0,
    yaw: std::f64::consts::PI,
    size: 0.1651,
};

/// Read-only lookup from marker id to its surveyed pose.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    markers: HashMap<u32, Marker>,
}

impl FieldMap {
    /// Build a map, rejecting duplicate ids and malformed markers.
    pub fn new(markers: impl IntoIterator<Item = Marker>) -> Result<Self, LocError> {
        let mut map = HashMap::new();
        for marker in markers {
            marker.validate()?;
            if map.insert(marker.id, marker).is_some() {
                return Err(LocError::Config(format!("duplicate marker id {}", marker.id)));
            }
        }
        Ok(Self { markers: map })
    }

    pub fn lookup(&self, id: u32) -> Option<&Marker> {
        self.markers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Known ids, ascending.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.markers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            markers: HashMap::from([(BENCH_MARKER.id, BENCH_MARKER)]),
        }
    }
}
