//! [`PoseEstimator`] – the per-tick fusion core.
//!
//! Each call to [`PoseEstimator::step`]:
//!
//! 1. **Drain** – takes every batch buffered on each configured source since
//!    the previous tick, plus any odometry deltas.
//! 2. **Measure** – looks each sighted marker up in the [`FieldMap`] and
//!    solves it into a robot-pose [`Measurement`]. Unknown ids and
//!    degenerate quads are dropped and counted.
//! 3. **Fuse** – combines this tick's measurements (and, once tracking with
//!    odometry wired, the motion-propagated previous estimate) by per-axis
//!    inverse variance.
//! 4. **Publish** – hands the resulting [`PoseEstimate`] to the transport.
//!
//! A tick with no usable measurement publishes nothing and leaves the state
//! untouched. `step` never blocks and never fails: transport trouble is
//! logged and counted.
//!
//! # States
//!
//! | State | Meaning |
//! |---|---|
//! | [`EstimatorState::Idle`] | No estimate produced yet. |
//! | [`EstimatorState::Tracking`] | Holds the last estimate. |
//!
//! The only transition is `Idle → Tracking`, on the first successful fuse.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tagfuse_middleware::Transport;
use tagfuse_perception::{CameraConfig, FieldMap, Measurement, fuse, measure};
use tagfuse_types::{LocError, Observation, OdometryDelta, PoseEstimate};
use tracing::{debug, error, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// One observation stream and the camera that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Transport key, e.g. `vision/unknown/0/Observation`.
    pub topic: String,
    #[serde(default)]
    pub camera: CameraConfig,
}

/// Configuration bundle for [`PoseEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    pub sources: Vec<SourceConfig>,
    /// Position sigma added per metre of odometry travel.
    #[serde(default = "default_noise_per_metre")]
    pub odometry_noise_per_metre: f64,
    /// Heading sigma added per radian of odometry rotation.
    #[serde(default = "default_noise_per_radian")]
    pub odometry_noise_per_radian: f64,
}

fn default_noise_per_metre() -> f64 {
    0.05
}

fn default_noise_per_radian() -> f64 {
    0.05
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig {
                topic: "vision/unknown/0/Observation".to_string(),
                camera: CameraConfig::default(),
            }],
            odometry_noise_per_metre: default_noise_per_metre(),
            odometry_noise_per_radian: default_noise_per_radian(),
        }
    }
}

impl EstimatorConfig {
    /// Source topics in configuration order.
    pub fn topics(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.topic.clone()).collect()
    }

    pub fn validate(&self) -> Result<(), LocError> {
        for source in &self.sources {
            source
                .camera
                .validate()
                .map_err(|e| LocError::Config(format!("source {}: {e}", source.topic)))?;
        }
        let noise = [self.odometry_noise_per_metre, self.odometry_noise_per_radian];
        if noise.iter().any(|n| !n.is_finite() || *n < 0.0) {
            return Err(LocError::Config(format!(
                "odometry noise must be non-negative, got {noise:?}"
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State and counters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EstimatorState {
    #[default]
    Idle,
    Tracking(PoseEstimate),
}

/// Counters owned by one estimator for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EstimatorStats {
    pub ticks: u64,
    pub batches: u64,
    pub observations: u64,
    pub unknown_markers: u64,
    pub degenerate: u64,
    /// Inbound batches or deltas the transport discarded before a drain.
    pub dropped: u64,
    pub publishes: u64,
    pub publish_failures: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// PoseEstimator
// ─────────────────────────────────────────────────────────────────────────────

/// Fuses marker sightings from every configured source into one pose per
/// tick. Generic over the [`Transport`] so tests can drive it in memory.
pub struct PoseEstimator<T: Transport> {
    field_map: Arc<FieldMap>,
    transport: T,
    config: EstimatorConfig,
    state: EstimatorState,
    /// Motion composed since the last published estimate.
    motion: OdometryDelta,
    odometry_seen: bool,
    stats: EstimatorStats,
}

impl<T: Transport> PoseEstimator<T> {
    /// # Errors
    ///
    /// Returns [`LocError::Config`] when `config` fails
    /// [`EstimatorConfig::validate`].
    pub fn new(
        field_map: Arc<FieldMap>,
        transport: T,
        config: EstimatorConfig,
    ) -> Result<Self, LocError> {
        config.validate()?;
        info!(
            markers = field_map.len(),
            sources = config.sources.len(),
            "pose estimator ready"
        );
        Ok(Self {
            field_map,
            transport,
            config,
            state: EstimatorState::Idle,
            motion: OdometryDelta::default(),
            odometry_seen: false,
            stats: EstimatorStats::default(),
        })
    }

    pub fn state(&self) -> &EstimatorState {
        &self.state
    }

    pub fn stats(&self) -> EstimatorStats {
        self.stats
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run one tick. Returns the estimate published this tick, if any.
    pub fn step(&mut self) -> Option<PoseEstimate> {
        self.stats.ticks += 1;

        for delta in self.transport.drain_odometry() {
            self.motion = self.motion.then(delta);
            self.odometry_seen = true;
        }

        let mut measurements = Vec::new();
        for source in &self.config.sources {
            for batch in self.transport.drain(&source.topic) {
                self.stats.batches += 1;
                for observation in &batch.observations {
                    self.stats.observations += 1;
                    match measure_one(&self.field_map, observation, &source.camera) {
                        Ok(m) => measurements.push(m),
                        Err(LocError::UnknownMarker(id)) => {
                            self.stats.unknown_markers += 1;
                            debug!(source = %source.topic, id, "dropping unknown marker");
                        }
                        Err(e) => {
                            self.stats.degenerate += 1;
                            debug!(
                                source = %source.topic,
                                id = observation.id,
                                error = %e,
                                "dropping sighting"
                            );
                        }
                    }
                }
            }
        }

        let dropped = self.transport.take_dropped();
        if dropped > 0 {
            self.stats.dropped += dropped;
            warn!(dropped, total = self.stats.dropped, "transport dropped inbound data");
        }

        if measurements.is_empty() {
            return None;
        }

        if let (EstimatorState::Tracking(last), true) = (&self.state, self.odometry_seen) {
            measurements.push(prior(last).predict(
                &self.motion,
                self.config.odometry_noise_per_metre,
                self.config.odometry_noise_per_radian,
            ));
        }

        let fused = fuse(&measurements)?;
        let estimate = PoseEstimate {
            x: fused.x,
            y: fused.y,
            theta: fused.theta,
            x_sigma: fused.x_sigma,
            y_sigma: fused.y_sigma,
            theta_sigma: fused.theta_sigma,
            dx: self.motion.dx,
            dy: self.motion.dy,
            dtheta: self.motion.dtheta,
            dt: self.motion.dt,
        };

        if self.state == EstimatorState::Idle {
            info!(x = estimate.x, y = estimate.y, theta = estimate.theta, "tracking");
        }
        self.state = EstimatorState::Tracking(estimate);
        self.motion = OdometryDelta::default();
        self.odometry_seen = false;

        match self.transport.publish(estimate) {
            Ok(()) => {
                self.stats.publishes += 1;
                debug!(
                    measurements = measurements.len(),
                    x = estimate.x,
                    y = estimate.y,
                    theta = estimate.theta,
                    "published estimate"
                );
                Some(estimate)
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                error!(error = %e, "failed to publish pose estimate");
                None
            }
        }
    }
}

fn measure_one(
    field_map: &FieldMap,
    observation: &Observation,
    camera: &CameraConfig,
) -> Result<Measurement, LocError> {
    let marker = field_map
        .lookup(observation.id)
        .ok_or(LocError::UnknownMarker(observation.id))?;
    measure(observation, marker, camera)
}

fn prior(last: &PoseEstimate) -> Measurement {
    Measurement {
        x: last.x,
        y: last.y,
        theta: last.theta,
        x_sigma: last.x_sigma,
        y_sigma: last.y_sigma,
        theta_sigma: last.theta_sigma,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
