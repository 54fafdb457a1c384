//! Environment-driven configuration.
//!
//! Every setting has a typed default, so embedders and tests can build the
//! structs directly. `from_env` reads an optional `.env` file first and then
//! the process environment; `from_lookup` takes any key → value function,
//! which keeps tests away from global state.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::bus::{BusConfig, OverflowPolicy};
use crate::lifecycle::Topology;

/// Error raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key is not set.
    #[error("missing required setting {0}")]
    Missing(String),
    /// A key is set but its value cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Top-level settings for the clock service.
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Broker URL handed to the bus connector.
    pub rabbitmq_url: String,
    /// Connection supervision and backlog settings.
    pub bus: BusConfig,
    /// Exchange and routing keys the scheduler listens and publishes on.
    pub topology: Topology,
    /// SQLite file for the persistent lifecycle store.
    pub database_path: Option<String>,
}

impl ClockConfig {
    /// Settings with defaults for everything except the broker URL.
    pub fn new(rabbitmq_url: impl Into<String>) -> Self {
        Self {
            rabbitmq_url: rabbitmq_url.into(),
            bus: BusConfig::default(),
            topology: Topology::default(),
            database_path: None,
        }
    }

    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_database(mut self, path: impl Into<String>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Load settings from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rabbitmq_url = required(&lookup, "RABBITMQ_URL")?;

        let defaults = BusConfig::default();
        let heartbeat_secs = or_default(&lookup, "BUS_HEARTBEAT_SECS", defaults.heartbeat.as_secs())?;
        let initial_ms = or_default(
            &lookup,
            "BUS_RECONNECT_INITIAL_MS",
            defaults.reconnect_initial.as_millis() as u64,
        )?;
        let max_ms = or_default(
            &lookup,
            "BUS_RECONNECT_MAX_MS",
            defaults.reconnect_max.as_millis() as u64,
        )?;
        let capacity: Option<usize> = optional(&lookup, "BUS_BACKLOG_CAPACITY")?;
        let overflow: OverflowPolicy =
            or_default(&lookup, "BUS_BACKLOG_OVERFLOW", OverflowPolicy::default())?;

        if heartbeat_secs == 0 {
            return Err(invalid("BUS_HEARTBEAT_SECS", "0", "must be at least one second"));
        }
        if initial_ms > max_ms {
            return Err(invalid(
                "BUS_RECONNECT_INITIAL_MS",
                &initial_ms.to_string(),
                "must not exceed BUS_RECONNECT_MAX_MS",
            ));
        }

        let bus = BusConfig {
            heartbeat: Duration::from_secs(heartbeat_secs),
            reconnect_initial: Duration::from_millis(initial_ms),
            reconnect_max: Duration::from_millis(max_ms),
            backlog_capacity: capacity,
            overflow,
        };

        let mut topology = match lookup("CLOCK_TOPOLOGY").as_deref() {
            None | Some("items") => Topology::items(),
            Some("contests") => Topology::contests(),
            Some("targets") => Topology::targets(),
            Some(other) => {
                return Err(invalid(
                    "CLOCK_TOPOLOGY",
                    other,
                    "expected one of items, contests, targets",
                ))
            }
        };
        if let Some(exchange) = lookup("CLOCK_EXCHANGE") {
            topology.exchange = exchange;
        }
        if let Some(key) = lookup("CLOCK_CREATED_KEY") {
            topology.created_key = key;
        }
        if let Some(key) = lookup("CLOCK_ENDED_KEY") {
            topology.ended_key = key;
        }

        let database_path = lookup("CLOCK_DATABASE").filter(|path| !path.trim().is_empty());

        Ok(Self {
            rabbitmq_url,
            bus,
            topology,
            database_path,
        })
    }
}

/// Read `.env` from the working directory if one exists.
pub(crate) fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to read environment file"),
    }
}

pub(crate) fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key.to_string())),
    }
}

pub(crate) fn optional<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

pub(crate) fn or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    Ok(optional(lookup, key)?.unwrap_or(default))
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
