//! Fixed-cadence driving loop for a [`PoseEstimator`].
//!
//! The estimator never schedules itself; [`Driver::run`] calls
//! [`PoseEstimator::step`] once per period on a Tokio interval until the
//! shared shutdown flag is raised. Missed ticks are skipped rather than
//! replayed in a burst.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tagfuse_middleware::Transport;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::estimator::PoseEstimator;

/// Shortest period [`Driver::run`] accepts.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Process-lifetime counters for one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DriverStats {
    pub ticks: u64,
    pub published: u64,
    /// Ticks that took longer than the period.
    pub overruns: u64,
    pub slowest_tick: Duration,
}

pub struct Driver<T: Transport> {
    estimator: PoseEstimator<T>,
    stats: DriverStats,
}

impl<T: Transport> Driver<T> {
    pub fn new(estimator: PoseEstimator<T>) -> Self {
        Self {
            estimator,
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn estimator(&self) -> &PoseEstimator<T> {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut PoseEstimator<T> {
        &mut self.estimator
    }

    /// Step the estimator once. Returns how long the step took.
    pub fn tick(&mut self) -> Duration {
        let started = Instant::now();
        let published = self.estimator.step().is_some();
        let elapsed = started.elapsed();

        self.stats.ticks += 1;
        if published {
            self.stats.published += 1;
        }
        self.stats.slowest_tick = self.stats.slowest_tick.max(elapsed);
        elapsed
    }

    /// Tick every `period` until `shutdown` is set.
    pub async fn run(&mut self, period: Duration, shutdown: Arc<AtomicBool>) -> DriverStats {
        let period = period.max(MIN_PERIOD);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = period.as_millis() as u64, "driver started");

        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            interval.tick().await;
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            let elapsed = self.tick();
            if elapsed > period {
                self.stats.overruns += 1;
                warn!(
                    elapsed_us = elapsed.as_micros() as u64,
                    period_us = period.as_micros() as u64,
                    "tick overran its period"
                );
            }
        }

        info!(
            ticks = self.stats.ticks,
            published = self.stats.published,
            overruns = self.stats.overruns,
            "driver stopped"
        );
        self.stats
    }
}
