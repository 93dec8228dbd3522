//! Topic-keyed publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others. Channels are created lazily the first time a topic is
//! published to or subscribed to.
//!
//! Every payload is wrapped into an [`Event`] at publish time; the event's
//! timestamp is the arrival time downstream consumers see.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tagfuse_types::{Event, EventPayload, LocError};
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently and is
    /// raised to 1 if zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Publish `payload` on `topic`, stamped with a fresh id and the current
    /// time.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `Ok(0)` when no subscribers are currently listening on the
    /// topic (this is a normal condition, not an error).
    ///
    /// # Errors
    ///
    /// Returns [`LocError::Transport`] if `topic` is blank.
    pub fn publish_to(&self, topic: &str, payload: EventPayload) -> Result<usize, LocError> {
        if topic.trim().is_empty() {
            return Err(LocError::Transport("cannot publish to a blank topic".to_string()));
        }
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.to_string(),
            payload,
        };
        match self.sender(topic).send(event) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => {
                trace!(topic, "no subscribers; event dropped");
                Ok(0)
            }
        }
    }

    /// Subscribe to `topic`.
    ///
    /// The receiver only sees events published after this call.
    pub fn subscribe_to(&self, topic: &str) -> TopicReceiver {
        TopicReceiver {
            topic: topic.to_string(),
            receiver: self.sender(topic).subscribe(),
            lagged: 0,
        }
    }

    /// Names of every topic that has been published to or subscribed to.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Event> {
        if let Some(sender) = self.inner.topics.read().get(topic) {
            return sender.clone();
        }
        let mut topics = self.inner.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// A receiver bound to a single topic.
///
/// Obtained via [`EventBus::subscribe_to`]. Each event is delivered to a
/// given receiver at most once, in publish order.
#[derive(Debug)]
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Event>,
    /// Events overwritten before `drain` reached them, not yet reported.
    lagged: u64,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Take every event buffered since the previous call without waiting.
    ///
    /// Events lost to lag are logged, counted for [`take_lagged`], and
    /// skipped; the survivors are returned in arrival order.
    ///
    /// [`take_lagged`]: TopicReceiver::take_lagged
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "receiver lagged");
                    self.lagged += n;
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
        events
    }

    /// Events lost to lag since the previous call.
    pub fn take_lagged(&mut self) -> u64 {
        std::mem::take(&mut self.lagged)
    }

    /// The topic this receiver is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
