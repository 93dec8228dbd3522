//! Shared vocabulary of the tagfuse stack: the wire types exchanged with the
//! marker detector and the robot controller, the bus envelope, and the global
//! error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Microseconds since the Unix epoch.
pub type Micros = i64;

/// One camera's sighting of one fiducial marker in one frame.
///
/// Corners are in pixels, in fixed order: 0 bottom-left, 1 bottom-right,
/// 2 top-right, 3 top-left, as the marker is seen from the front in an image
/// whose v axis points down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: u32,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub x3: f64,
    pub y3: f64,
}

impl Observation {
    /// Build an observation from its four `[u, v]` corners.
    pub fn from_corners(id: u32, corners: [[f64; 2]; 4]) -> Self {
        let [[x0, y0], [x1, y1], [x2, y2], [x3, y3]] = corners;
        Self {
            id,
            x0,
            y0,
            x1,
            y1,
            x2,
            y2,
            x3,
            y3,
        }
    }

    /// The four corners as `[u, v]` pairs, in wire order.
    pub fn corners(&self) -> [[f64; 2]; 4] {
        [
            [self.x0, self.y0],
            [self.x1, self.y1],
            [self.x2, self.y2],
            [self.x3, self.y3],
        ]
    }
}

/// All observations from one source at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    /// Arrival time stamped by the bus.
    pub timestamp_us: Micros,
    pub observations: Vec<Observation>,
}

/// Fused robot pose in the field frame, with per-axis uncertainty and the
/// motion accumulated since the previous estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub x: f64,
    pub y: f64,
    /// Heading in (−π, π].
    pub theta: f64,
    pub x_sigma: f64,
    pub y_sigma: f64,
    pub theta_sigma: f64,
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
    /// Seconds.
    pub dt: f64,
}

/// Incremental robot-frame motion reported by an odometry source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OdometryDelta {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
    /// Seconds.
    pub dt: f64,
}

impl OdometryDelta {
    /// Chain `next` after `self`. `next` is expressed in the robot frame
    /// reached at the end of `self`.
    pub fn then(self, next: OdometryDelta) -> OdometryDelta {
        let (s, c) = self.dtheta.sin_cos();
        OdometryDelta {
            dx: self.dx + c * next.dx - s * next.dy,
            dy: self.dy + s * next.dx + c * next.dy,
            dtheta: self.dtheta + next.dtheta,
            dt: self.dt + next.dt,
        }
    }
}

/// Unified envelope for everything routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Arrival time at the bus.
    pub timestamp: DateTime<Utc>,
    /// e.g. `"vision/unknown/0/Observation"`
    pub topic: String,
    pub payload: EventPayload,
}

impl Event {
    /// Arrival time in microseconds since the Unix epoch.
    pub fn timestamp_us(&self) -> Micros {
        self.timestamp.timestamp_micros()
    }
}

/// Variants of data that can be routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Observations(Vec<Observation>),
    Odometry(OdometryDelta),
    Pose(PoseEstimate),
}

/// Global error type.
///
/// `UnknownMarker` and `DegenerateGeometry` are recovered inside the
/// estimator and never surface from a tick; `Transport` raised while wiring
/// the process is fatal.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocError {
    #[error("Unknown marker id {0}")]
    UnknownMarker(u32),

    #[error("Degenerate marker geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
