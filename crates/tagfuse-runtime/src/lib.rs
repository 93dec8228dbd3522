//! `tagfuse-runtime` – the estimator and what drives it.
//!
//! # Modules
//!
//! - [`estimator`] – [`PoseEstimator`][estimator::PoseEstimator]: drains
//!   observation batches from a [`Transport`][tagfuse_middleware::Transport],
//!   solves each sighting against the field map, fuses the results, and
//!   publishes one [`PoseEstimate`][tagfuse_types::PoseEstimate] per tick.
//! - [`driver`] – [`Driver`][driver::Driver]: calls `step()` on a fixed
//!   Tokio interval until shutdown and keeps process-lifetime counters.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod driver;
pub mod estimator;
pub mod telemetry;

pub use driver::{Driver, DriverStats};
pub use estimator::{EstimatorConfig, EstimatorState, EstimatorStats, PoseEstimator, SourceConfig};
pub use telemetry::{TracerProviderGuard, init_tracing};
