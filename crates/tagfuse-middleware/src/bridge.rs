//! WebSocket bridge between external peers and the internal [`EventBus`].
//!
//! [`NetBridge`]:
//!
//! 1. **Ingests** frames pushed by marker detectors and odometry sources and
//!    publishes them onto the bus under the topic the frame names. Binary
//!    frames use the layout in [`crate::codec`]; text frames are JSON:
//!
//!    ```text
//!    {"topic": "vision/unknown/0/Observation", "observations": [{"id": 0, "x0": 190.0, ...}]}
//!    {"topic": "vision/unknown/Odometry", "odometry": {"dx": 0.1, "dy": 0.0, "dtheta": 0.0, "dt": 0.02}}
//!    ```
//!
//! 2. **Streams** every pose estimate published on the pose topic back to all
//!    connected clients as an 80-byte binary frame.
//!
//! The bridge is agnostic about the *meaning* of what it routes; it only
//! handles encoding and transport.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tagfuse_types::{EventPayload, LocError, Observation, OdometryDelta};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::codec;

/// JSON form of an inbound frame.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    topic: String,
    #[serde(default)]
    observations: Option<Vec<Observation>>,
    #[serde(default)]
    odometry: Option<OdometryDelta>,
}

/// Bridge between WebSocket clients and the internal [`EventBus`].
#[derive(Clone, Debug)]
pub struct NetBridge {
    bus: EventBus,
    pose_topic: String,
}

impl NetBridge {
    /// Create a new bridge backed by `bus`, streaming estimates from
    /// `pose_topic`.
    pub fn new(bus: EventBus, pose_topic: impl Into<String>) -> Self {
        Self {
            bus,
            pose_topic: pose_topic.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Ingest helpers
    // -----------------------------------------------------------------------

    /// Publish one observation batch on `topic`.
    pub fn ingest_observations(
        &self,
        topic: &str,
        observations: Vec<Observation>,
    ) -> Result<usize, LocError> {
        self.bus
            .publish_to(topic, EventPayload::Observations(observations))
    }

    /// Publish one odometry delta on `topic`.
    pub fn ingest_odometry(&self, topic: &str, delta: OdometryDelta) -> Result<usize, LocError> {
        self.bus.publish_to(topic, EventPayload::Odometry(delta))
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`LocError::Transport`] if the TCP listener cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, LocError> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| LocError::Transport(format!("ws bind error on {addr}: {e}")))
    }

    /// Accept clients on `listener` until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> Result<(), LocError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, pose_topic = %self.pose_topic, "bridge listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), LocError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| LocError::Transport(format!("ws handshake from {peer}: {e}")))?;
        info!(peer = %peer, "client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut poses = self.bus.subscribe_to(&self.pose_topic);

        loop {
            tokio::select! {
                // Forward pose estimates from the bus to the client.
                result = poses.recv() => {
                    match result {
                        Ok(event) => {
                            let EventPayload::Pose(estimate) = event.payload else {
                                continue;
                            };
                            let frame = codec::encode_pose(&estimate);
                            if ws_tx.send(Message::Binary(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                // Handle incoming frames.
                msg = ws_rx.next() => {
                    let outcome = match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Binary(data))) => self.handle_binary_frame(&data),
                        Some(Ok(Message::Text(text))) => self.handle_text_frame(text.as_str()),
                        Some(Ok(_)) => continue,
                    };
                    if let Err(e) = outcome {
                        debug!(peer = %peer, error = %e, "dropping malformed frame");
                    }
                }
            }
        }

        info!(peer = %peer, "client disconnected");
        Ok(())
    }

    /// Decode a binary observation frame and publish it.
    fn handle_binary_frame(&self, data: &[u8]) -> Result<usize, LocError> {
        let (topic, observations) = codec::decode_frame(data)?;
        self.ingest_observations(&topic, observations)
    }

    /// Parse a JSON frame and publish whichever payload it carries.
    fn handle_text_frame(&self, text: &str) -> Result<usize, LocError> {
        let message: InboundMessage =
            serde_json::from_str(text).map_err(|e| LocError::Codec(e.to_string()))?;
        match (message.observations, message.odometry) {
            (Some(observations), _) => self.ingest_observations(&message.topic, observations),
            (None, Some(delta)) => self.ingest_odometry(&message.topic, delta),
            (None, None) => Err(LocError::Codec(format!(
                "frame for {} carries no payload",
                message.topic
            ))),
        }
    }
}
