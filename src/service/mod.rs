//! Clock service: the scheduler wired to the bus.
//!
//! ## Quick Start
//!
//! ```ignore
//! use contest_clock::{init_tracing, ClockConfig, ClockService, Topology};
//! use contest_clock::bus::InMemoryBroker;
//!
//! init_tracing();
//! let config = ClockConfig::new("amqp://localhost").with_topology(Topology::contests());
//! let service = ClockService::start(InMemoryBroker::new(), config).await?;
//! ```

mod clock_service;
mod error;
mod handler;

pub use clock_service::ClockService;
pub use error::ServiceError;
pub use handler::{CreatedHandler, ServiceStats};
