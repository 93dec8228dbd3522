//! `tagfuse-middleware` – the transport bus.
//!
//! Routes observation batches in and pose estimates out without caring about
//! the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Topic-keyed publish/subscribe event bus built on Tokio
//!   broadcast channels; stamps every item with its arrival time.
//! - [`transport`] – The [`Transport`] capability the estimator consumes, with
//!   the bus-backed [`BusTransport`] and the in-memory [`FakeTransport`].
//! - [`topic`] – `<domain>/<identity>/<camera-index>/Observation` naming.
//! - [`codec`] – Fixed little-endian byte layout of the wire types.
//! - [`bridge`] – WebSocket bridge that feeds external detectors into the bus
//!   and streams pose estimates back out.

pub mod bridge;
pub mod bus;
pub mod codec;
pub mod topic;
pub mod transport;

pub use bridge::NetBridge;
pub use bus::{EventBus, TopicReceiver};
pub use transport::{BusTransport, FakeTransport, Transport};
