//! Wire message shape and the pluggable serialization collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::transport::Frame;
use crate::error::CodecError;

/// Routing key the heartbeat monitor sends to probe a peer.
pub const PING: &str = "ping";

/// Routing key a peer answers a [`PING`] with.
pub const PONG: &str = "pong";

/// A routed message: a routing key plus an opaque body.
///
/// Serializes as `{"path": "...", "data": ...}`. A missing `data` field
/// decodes to `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Routing key selecting the handler.
    pub path: String,
    /// Handler-specific body.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Message {
    /// Creates a message for the given routing key.
    #[must_use]
    pub fn new(path: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Heartbeat probe with a `null` body.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING, serde_json::Value::Null)
    }

    /// Heartbeat answer with a `null` body.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(PONG, serde_json::Value::Null)
    }

    /// Returns the routing key.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.path
    }
}

/// Converts between transport payloads and [`Message`]s.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Decodes a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the payload is not a valid message.
    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError>;

    /// Encodes a message into a frame ready for the transport.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the message cannot be represented.
    fn encode(&self, message: &Message) -> Result<Frame, CodecError>;
}

/// JSON codec emitting text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, message: &Message) -> Result<Frame, CodecError> {
        serde_json::to_string(message)
            .map(Frame::Text)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}
