//! Seam between the bus client and a concrete message broker.
//!
//! A broker adapter implements [`Connector`] to open connections and
//! [`Channel`] for the operations the client needs. Channel operations are
//! synchronous and must not wait for broker confirmation: a publish hands the
//! frame to the connection and returns.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BusError, Delivery};

/// Stream of deliveries for one consumed queue. The sender side is dropped
/// when the underlying connection closes.
pub type Deliveries = mpsc::UnboundedReceiver<Delivery>;

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Channel>, BusError>;
}

/// One open channel on a broker connection.
pub trait Channel: Send + Sync {
    /// False once the connection behind this channel is gone.
    fn is_open(&self) -> bool;

    /// Declare a queue; declaring an existing queue is a no-op.
    fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BusError>;

    /// Route messages published to `exchange` with a matching key into `queue`.
    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BusError>;

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Start consuming `queue` with automatic acknowledgement.
    fn consume(&self, queue: &str) -> Result<Deliveries, BusError>;
}
