//! Message bus seam
//!
//! The pub/sub bus itself is external. The bridge only needs two things from
//! it: a stream of inbound [`BusMessage`]s and somewhere to publish readings.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// One bus message: topic plus raw JSON body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Full topic name
    pub topic: String,
    /// Raw body bytes
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Create a message with a JSON body
    pub fn json(topic: impl Into<String>, body: &serde_json::Value) -> Self {
        Self::new(topic, body.to_string())
    }
}

/// JSON-lines envelope used by stream adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Full topic name
    pub topic: String,
    /// JSON body
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl From<Envelope> for BusMessage {
    fn from(env: Envelope) -> Self {
        BusMessage::json(env.topic, &env.payload)
    }
}

/// Bus error types
#[derive(Error, Debug)]
pub enum BusError {
    /// Nobody is listening
    #[error("No subscribers for {0}")]
    NoSubscribers(String),

    /// Body is not valid JSON
    #[error("Invalid JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// Underlying sink failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Outbound side of the bus
pub trait BusPublisher: Send + Sync {
    /// Publish a body on a topic (fire-and-forget, QoS 0)
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// In-process bus backed by a broadcast channel
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LocalBus {
    /// Create a bus retaining up to `capacity` messages per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every published message
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl BusPublisher for LocalBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.tx
            .send(BusMessage::new(topic, Bytes::copy_from_slice(payload)))
            .map(|_| ())
            .map_err(|_| BusError::NoSubscribers(topic.to_string()))
    }
}
