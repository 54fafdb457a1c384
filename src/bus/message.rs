//! Messages travelling through the bus.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use super::HandlerError;

/// A publish that has not yet been confirmed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    /// Opaque payload bytes, typically JSON.
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload: payload.into(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A message handed to a subscription handler.
///
/// Deliveries are acknowledged on receipt: once a handler has seen one,
/// the broker will not send it again, whatever the handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// Broker-assigned sequence number, unique per broker.
    pub delivery_tag: u64,
}

impl Delivery {
    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_slice(&self.payload).map_err(HandlerError::Decode)
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
