//! The transport capability the pose estimator depends on.
//!
//! The estimator only needs two things from the outside world: a way to take
//! the observation batches that arrived on a source since it last asked, and
//! a way to hand out its result. [`Transport`] captures exactly that, with two
//! interchangeable implementations:
//!
//! - [`BusTransport`] – backed by the shared [`EventBus`].
//! - [`FakeTransport`] – an in-memory double for tests and replays.

use std::collections::HashMap;

use tagfuse_types::{EventPayload, LocError, ObservationBatch, OdometryDelta, PoseEstimate};
use tracing::{debug, info};

use crate::bus::{EventBus, TopicReceiver};
use crate::topic::is_valid_topic;

/// Ingress/egress capability consumed by the pose estimator.
///
/// # Contract
///
/// * `drain` – returns every batch that arrived on `source` since the
///   previous call for that source, in arrival order, each batch at most
///   once. Never blocks. Must only be called from one consuming thread.
/// * `drain_odometry` – same, for the odometry stream. Transports without
///   a motion source return nothing.
/// * `take_dropped` – how many inbound items the transport had to discard
///   since the previous call, e.g. because a bounded buffer overflowed
///   between ticks. Delivery is exactly once only while this stays zero.
/// * `publish` – hands one pose estimate downstream.
pub trait Transport {
    fn drain(&mut self, source: &str) -> Vec<ObservationBatch>;

    fn drain_odometry(&mut self) -> Vec<OdometryDelta> {
        Vec::new()
    }

    fn take_dropped(&mut self) -> u64 {
        0
    }

    fn publish(&mut self, estimate: PoseEstimate) -> Result<(), LocError>;
}

// ---------------------------------------------------------------------------
// Bus-backed transport
// ---------------------------------------------------------------------------

/// [`Transport`] over the shared [`EventBus`].
///
/// Subscribes to every source at construction, so nothing published after
/// [`BusTransport::connect`] returns is missed.
#[derive(Debug)]
pub struct BusTransport {
    bus: EventBus,
    sources: HashMap<String, TopicReceiver>,
    odometry: Option<TopicReceiver>,
    pose_topic: String,
}

impl BusTransport {
    /// Register the source, odometry, and pose topics on `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`LocError::Transport`] when the topics are mis-registered:
    /// no sources, a blank or whitespace-containing topic, a duplicated
    /// source, or a pose topic that is also an input.
    pub fn connect(
        bus: EventBus,
        sources: &[String],
        pose_topic: &str,
        odometry_topic: Option<&str>,
    ) -> Result<Self, LocError> {
        if sources.is_empty() {
            return Err(LocError::Transport("no observation sources configured".to_string()));
        }
        if !is_valid_topic(pose_topic) {
            return Err(LocError::Transport(format!("invalid pose topic {pose_topic:?}")));
        }

        let mut receivers = HashMap::with_capacity(sources.len());
        for source in sources {
            if !is_valid_topic(source) {
                return Err(LocError::Transport(format!("invalid source topic {source:?}")));
            }
            if source == pose_topic || Some(source.as_str()) == odometry_topic {
                return Err(LocError::Transport(format!(
                    "source topic {source:?} collides with an output or odometry topic"
                )));
            }
            if receivers.contains_key(source) {
                return Err(LocError::Transport(format!("duplicate source topic {source:?}")));
            }
            receivers.insert(source.clone(), bus.subscribe_to(source));
        }

        let odometry = match odometry_topic {
            Some(topic) if !is_valid_topic(topic) || topic == pose_topic => {
                return Err(LocError::Transport(format!("invalid odometry topic {topic:?}")));
            }
            Some(topic) => Some(bus.subscribe_to(topic)),
            None => None,
        };

        info!(
            sources = receivers.len(),
            pose_topic,
            odometry = odometry_topic.unwrap_or("<none>"),
            "bus transport connected"
        );

        Ok(Self {
            bus,
            sources: receivers,
            odometry,
            pose_topic: pose_topic.to_string(),
        })
    }

    pub fn pose_topic(&self) -> &str {
        &self.pose_topic
    }
}

impl Transport for BusTransport {
    fn drain(&mut self, source: &str) -> Vec<ObservationBatch> {
        let Some(receiver) = self.sources.get_mut(source) else {
            debug!(source, "drain on unregistered source");
            return Vec::new();
        };
        receiver
            .drain()
            .into_iter()
            .filter_map(|event| {
                let timestamp_us = event.timestamp_us();
                match event.payload {
                    EventPayload::Observations(observations) => Some(ObservationBatch {
                        timestamp_us,
                        observations,
                    }),
                    other => {
                        debug!(source, payload = ?other, "ignoring non-observation payload");
                        None
                    }
                }
            })
            .collect()
    }

    fn drain_odometry(&mut self) -> Vec<OdometryDelta> {
        let Some(receiver) = self.odometry.as_mut() else {
            return Vec::new();
        };
        receiver
            .drain()
            .into_iter()
            .filter_map(|event| match event.payload {
                EventPayload::Odometry(delta) => Some(delta),
                _ => None,
            })
            .collect()
    }

    fn take_dropped(&mut self) -> u64 {
        self.sources
            .values_mut()
            .chain(self.odometry.as_mut())
            .map(TopicReceiver::take_lagged)
            .sum()
    }

    fn publish(&mut self, estimate: PoseEstimate) -> Result<(), LocError> {
        self.bus
            .publish_to(&self.pose_topic, EventPayload::Pose(estimate))
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// In-memory double
// ---------------------------------------------------------------------------

/// In-memory [`Transport`]: tests fill the queues directly and inspect what
/// was published.
#[derive(Debug, Default)]
pub struct FakeTransport {
    /// Pending batches per source, oldest first.
    pub received: HashMap<String, Vec<ObservationBatch>>,
    /// Pending odometry deltas, oldest first.
    pub odometry: Vec<OdometryDelta>,
    /// Every estimate published so far.
    pub published: Vec<PoseEstimate>,
    /// When set, `publish` fails with [`LocError::Transport`].
    pub fail_publish: bool,
    /// Reported, then reset, by `take_dropped`.
    pub dropped: u64,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch on `source`.
    pub fn push(&mut self, source: &str, batch: ObservationBatch) {
        self.received.entry(source.to_string()).or_default().push(batch);
    }

    /// The most recently published estimate.
    pub fn estimate(&self) -> Option<&PoseEstimate> {
        self.published.last()
    }
}

impl Transport for FakeTransport {
    fn drain(&mut self, source: &str) -> Vec<ObservationBatch> {
        self.received
            .get_mut(source)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn drain_odometry(&mut self) -> Vec<OdometryDelta> {
        std::mem::take(&mut self.odometry)
    }

    fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }

    fn publish(&mut self, estimate: PoseEstimate) -> Result<(), LocError> {
        if self.fail_publish {
            return Err(LocError::Transport("publish disabled".to_string()));
        }
        self.published.push(estimate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagfuse_types::Observation;

    fn blip(id: u32) -> Observation {
        Observation::from_corners(
            id,
            [[190.0, 210.0], [210.0, 210.0], [210.0, 190.0], [190.0, 190.0]],
        )
    }

    fn sources(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn connect_rejects_misregistered_topics() {
        let bus = EventBus::default();
        assert!(BusTransport::connect(bus.clone(), &[], "pose", None).is_err());
        assert!(BusTransport::connect(bus.clone(), &sources(&["a b"]), "pose", None).is_err());
        assert!(BusTransport::connect(bus.clone(), &sources(&["a", "a"]), "pose", None).is_err());
        assert!(BusTransport::connect(bus.clone(), &sources(&["pose"]), "pose", None).is_err());
        assert!(BusTransport::connect(bus.clone(), &sources(&["a"]), "", None).is_err());
        assert!(BusTransport::connect(bus.clone(), &sources(&["a"]), "pose", Some("a")).is_err());
        assert!(BusTransport::connect(bus, &sources(&["a"]), "pose", Some("pose")).is_err());
    }

    #[test]
    fn bus_transport_drains_batches_in_order() {
        let bus = EventBus::default();
        let mut transport =
            BusTransport::connect(bus.clone(), &sources(&["foo/1"]), "pose", None).unwrap();

        bus.publish_to("foo/1", EventPayload::Observations(vec![blip(1)])).unwrap();
        bus.publish_to("foo/1", EventPayload::Observations(vec![blip(2), blip(3)]))
            .unwrap();

        let batches = transport.drain("foo/1");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].observations[0].id, 1);
        assert_eq!(batches[1].observations.len(), 2);
        assert!(batches[0].timestamp_us <= batches[1].timestamp_us);
        assert!(transport.drain("foo/1").is_empty());
        assert!(transport.drain("not/registered").is_empty());
    }

    #[test]
    fn bus_transport_publishes_on_pose_topic() {
        let bus = EventBus::default();
        let mut pose_rx = bus.subscribe_to("pose");
        let mut transport =
            BusTransport::connect(bus.clone(), &sources(&["foo/1"]), "pose", None).unwrap();
        assert_eq!(transport.pose_topic(), "pose");

        let estimate = PoseEstimate {
            x: 2.0,
            ..Default::default()
        };
        transport.publish(estimate).unwrap();

        let events = pose_rx.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].payload, EventPayload::Pose(p) if p.x == 2.0));
    }

    #[test]
    fn bus_transport_odometry_is_optional() {
        let bus = EventBus::default();
        let mut without =
            BusTransport::connect(bus.clone(), &sources(&["foo/1"]), "pose", None).unwrap();
        let mut with = BusTransport::connect(
            bus.clone(),
            &sources(&["foo/1"]),
            "pose",
            Some("vision/unknown/Odometry"),
        )
        .unwrap();

        let delta = OdometryDelta {
            dx: 0.1,
            dt: 0.02,
            ..Default::default()
        };
        bus.publish_to("vision/unknown/Odometry", EventPayload::Odometry(delta)).unwrap();

        assert!(without.drain_odometry().is_empty());
        assert_eq!(with.drain_odometry(), vec![delta]);
    }

    #[test]
    fn bus_transport_reports_overflowed_batches() {
        let bus = EventBus::new(2);
        let mut transport = BusTransport::connect(
            bus.clone(),
            &sources(&["foo/1"]),
            "pose",
            Some("vision/unknown/Odometry"),
        )
        .unwrap();

        for id in 0..5 {
            bus.publish_to("foo/1", EventPayload::Observations(vec![blip(id)])).unwrap();
        }
        for _ in 0..3 {
            bus.publish_to(
                "vision/unknown/Odometry",
                EventPayload::Odometry(OdometryDelta::default()),
            )
            .unwrap();
        }

        let ids: Vec<u32> = transport
            .drain("foo/1")
            .iter()
            .map(|b| b.observations[0].id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(transport.drain_odometry().len(), 2);
        assert_eq!(transport.take_dropped(), 4);
        assert_eq!(transport.take_dropped(), 0);
    }

    #[test]
    fn fake_transport_drain_is_exactly_once() {
        let mut fake = FakeTransport::new();
        fake.push(
            "foo",
            ObservationBatch {
                timestamp_us: 10,
                observations: vec![blip(0)],
            },
        );
        fake.push(
            "foo",
            ObservationBatch {
                timestamp_us: 20,
                observations: vec![blip(0)],
            },
        );

        let drained = fake.drain("foo");
        assert_eq!(
            drained.iter().map(|b| b.timestamp_us).collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert!(fake.drain("foo").is_empty());
        assert!(fake.drain("bar").is_empty());
        assert_eq!(fake.take_dropped(), 0);
    }

    #[test]
    fn fake_transport_records_and_fails_publish() {
        let mut fake = FakeTransport::new();
        assert!(fake.estimate().is_none());
        fake.publish(PoseEstimate::default()).unwrap();
        assert_eq!(fake.published.len(), 1);

        fake.fail_publish = true;
        assert!(fake.publish(PoseEstimate::default()).is_err());
        assert_eq!(fake.published.len(), 1);
    }
}
