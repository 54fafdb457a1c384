use std::time::Duration;

use crate::config::{load_dotenv, or_default, ConfigError};

/// Settings for one protected call type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Upper bound on a single call; exceeding it counts as a failure.
    pub call_timeout: Duration,
    /// Failure percentage (0-100) within the rolling window that trips the breaker.
    pub error_threshold_percent: u8,
    /// How long the breaker stays open before admitting a trial call.
    pub open_duration: Duration,
    /// Outcomes the window must hold before the threshold is evaluated.
    pub minimum_requests: u32,
    /// Length of the statistics window; counts restart when it elapses.
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(3_000),
            error_threshold_percent: 50,
            open_duration: Duration::from_millis(10_000),
            minimum_requests: 4,
            rolling_window: Duration::from_millis(10_000),
        }
    }
}

impl BreakerConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Values above 100 are clamped.
    pub fn with_error_threshold_percent(mut self, percent: u8) -> Self {
        self.error_threshold_percent = percent.min(100);
        self
    }

    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    pub fn with_minimum_requests(mut self, minimum: u32) -> Self {
        self.minimum_requests = minimum;
        self
    }

    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    /// Read `{prefix}_CALL_TIMEOUT_MS`, `{prefix}_ERROR_THRESHOLD_PERCENT`,
    /// `{prefix}_OPEN_DURATION_MS`, `{prefix}_MINIMUM_REQUESTS` and
    /// `{prefix}_ROLLING_WINDOW_MS` from the environment.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let key = |name: &str| format!("{prefix}_{name}");

        let threshold_key = key("ERROR_THRESHOLD_PERCENT");
        let threshold: u8 =
            or_default(&lookup, &threshold_key, defaults.error_threshold_percent)?;
        if threshold > 100 {
            return Err(ConfigError::Invalid {
                key: threshold_key,
                value: threshold.to_string(),
                reason: "must be between 0 and 100".into(),
            });
        }

        Ok(Self {
            call_timeout: Duration::from_millis(or_default(
                &lookup,
                &key("CALL_TIMEOUT_MS"),
                defaults.call_timeout.as_millis() as u64,
            )?),
            error_threshold_percent: threshold,
            open_duration: Duration::from_millis(or_default(
                &lookup,
                &key("OPEN_DURATION_MS"),
                defaults.open_duration.as_millis() as u64,
            )?),
            minimum_requests: or_default(&lookup, &key("MINIMUM_REQUESTS"), defaults.minimum_requests)?,
            rolling_window: Duration::from_millis(or_default(
                &lookup,
                &key("ROLLING_WINDOW_MS"),
                defaults.rolling_window.as_millis() as u64,
            )?),
        })
    }
}
