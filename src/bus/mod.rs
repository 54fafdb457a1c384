//! Service bus client with outage resilience.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 BusClient (one per process)                 │
//! │  publish() ── connected & backlog empty ──▶ Channel         │
//! │      │                                                      │
//! │      └── otherwise ──▶ Backlog (FIFO, in memory)            │
//! │                                                             │
//! │  supervisor: heartbeat check, reconnect with backoff,       │
//! │              restore subscriptions, replay backlog          │
//! │  consumers:  one task per subscription, auto-ack            │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Connector + Channel traits                     │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌─────────────────┐              ┌──────────────────────────┐
//! │ InMemoryBroker  │              │  AMQP adapter            │
//! │   (included)    │              │  (external)              │
//! └─────────────────┘              └──────────────────────────┘
//! ```
//!
//! ## Delivery guarantees
//!
//! - Publishing is fire-and-forget. While the broker is unreachable messages
//!   wait in the backlog; a process crash loses them.
//! - Consumption is at-most-once: deliveries are acknowledged on receipt and
//!   never redelivered, even when the handler fails.
//!
//! Downstream consumers must therefore be idempotent and tolerate gaps.

mod backlog;
mod broker;
mod client;
mod error;
mod handler;
mod in_memory;
mod message;
mod publisher;

pub use backlog::{Backlog, BacklogError, DrainReport, OverflowPolicy};
pub use broker::{Channel, Connector, Deliveries};
pub use client::{BusClient, BusConfig, ConnectionState};
pub use error::BusError;
pub use handler::{handler_fn, FnHandler, HandlerError, MessageHandler};
pub use in_memory::{topic_matches, InMemoryBroker, InMemoryChannel, PublishedMessage};
pub use message::{Delivery, OutboundMessage};
pub use publisher::EventPublisher;
