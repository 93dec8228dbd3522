//! Topic naming.
//!
//! Observation streams are namespaced per robot identity and camera index:
//!
//! ```text
//! <domain>/<identity>/<camera-index>/Observation
//! <domain>/<identity>/Odometry
//! ```
//!
//! The pose estimate goes out on a single configured topic.

/// Default output topic for fused pose estimates.
pub const DEFAULT_POSE_TOPIC: &str = "pose";

/// Topic carrying observation batches from one camera.
pub fn observation_topic(domain: &str, identity: &str, camera_index: usize) -> String {
    format!("{domain}/{identity}/{camera_index}/Observation")
}

/// Topic carrying odometry deltas for one robot.
pub fn odometry_topic(domain: &str, identity: &str) -> String {
    format!("{domain}/{identity}/Odometry")
}

/// A topic is usable when it is non-empty and contains no whitespace.
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.chars().any(char::is_whitespace)
}
