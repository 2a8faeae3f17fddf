//! Engine configuration
//!
//! Defaults can be overridden in code with the `with_*` setters or from the
//! environment with `DOG_JOBS__`-prefixed variables:
//!
//! ```bash
//! export DOG_JOBS__MAX_RETRIES=5
//! export DOG_JOBS__RETRY_DELAY_MS=1000,5000,30000
//! export DOG_JOBS__RETRY_TYPE=fixed
//! export DOG_JOBS__STOP_TIMEOUT_MS=10000
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{backend::SubscribeOptions, Job, QueueError, QueueResult};

pub const ENV_PREFIX: &str = "DOG_JOBS__";

/// Computes a retry delay from the failed job; `None` means no delay applies
pub type RetryDelayFn = Arc<dyn Fn(&Job) -> Option<Duration> + Send + Sync>;

/// Base delay used to schedule a retry
#[derive(Clone)]
pub enum RetryDelay {
    /// One delay, shaped by [`RetryType`]
    Fixed(Duration),

    /// Delay per attempt; attempts past the end reuse the last entry
    PerAttempt(Vec<Duration>),

    /// Delay computed from the failed job
    Custom(RetryDelayFn),
}

impl RetryDelay {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Job) -> Option<Duration> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::PerAttempt(delays) => f.debug_tuple("PerAttempt").field(delays).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FromStr for RetryDelay {
    type Err = QueueError;

    /// Parses `"1000"` or `"1000,5000,30000"` (milliseconds)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let delays = s
            .split(',')
            .map(|part| parse_millis("RETRY_DELAY_MS", part))
            .collect::<QueueResult<Vec<_>>>()?;

        if delays.len() == 1 {
            Ok(Self::Fixed(delays[0]))
        } else {
            Ok(Self::PerAttempt(delays))
        }
    }
}

/// How a [`RetryDelay::Fixed`] delay grows with attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryType {
    Fixed,
    #[default]
    Exponential,
}

impl FromStr for RetryType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(QueueError::configuration(format!(
                "unknown retry type `{other}`, expected `fixed` or `exponential`"
            ))),
        }
    }
}

/// Settings consumed by the commands and managers
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Failed attempts allowed before a job stays Failed
    pub max_retries: u32,
    pub retry_delay: RetryDelay,
    pub retry_type: RetryType,
    /// How long `stop` waits before killing a worker
    pub stop_timeout: Duration,
    pub stop_poll_interval: Duration,
    pub wait_poll_interval: Duration,
    /// Upper bound of the random delay before each pop
    pub poll_jitter: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: RetryDelay::Fixed(Duration::from_secs(1)),
            retry_type: RetryType::Exponential,
            stop_timeout: Duration::from_secs(30),
            stop_poll_interval: Duration::from_millis(100),
            wait_poll_interval: Duration::from_millis(300),
            poll_jitter: Duration::from_millis(25),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: RetryDelay) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_retry_type(mut self, retry_type: RetryType) -> Self {
        self.retry_type = retry_type;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn with_stop_poll_interval(mut self, interval: Duration) -> Self {
        self.stop_poll_interval = interval;
        self
    }

    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    pub fn with_poll_jitter(mut self, jitter: Duration) -> Self {
        self.poll_jitter = jitter;
        self
    }

    /// Defaults overridden by `DOG_JOBS__*` environment variables
    pub fn from_env() -> QueueResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by `DOG_JOBS__*` pairs; other keys are ignored
    pub fn from_vars<I, K, V>(vars: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match key {
                "MAX_RETRIES" => {
                    config.max_retries = value.parse().map_err(|_| invalid(key, value))?;
                }
                "RETRY_DELAY_MS" => config.retry_delay = value.parse()?,
                "RETRY_TYPE" => config.retry_type = value.parse()?,
                "STOP_TIMEOUT_MS" => config.stop_timeout = parse_millis(key, value)?,
                "STOP_POLL_INTERVAL_MS" => config.stop_poll_interval = parse_millis(key, value)?,
                "WAIT_POLL_INTERVAL_MS" => config.wait_poll_interval = parse_millis(key, value)?,
                "POLL_JITTER_MS" => config.poll_jitter = parse_millis(key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QueueResult<()> {
        if let RetryDelay::PerAttempt(delays) = &self.retry_delay {
            if delays.is_empty() {
                return Err(QueueError::configuration("per-attempt retry delays must not be empty"));
            }
        }
        if self.stop_timeout.is_zero() {
            return Err(QueueError::configuration("stop timeout must be greater than zero"));
        }
        if self.stop_poll_interval.is_zero() || self.wait_poll_interval.is_zero() {
            return Err(QueueError::configuration("poll intervals must be greater than zero"));
        }
        Ok(())
    }

    /// Options for the worker job feed
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            max_jitter: self.poll_jitter,
            ..SubscribeOptions::default()
        }
    }
}

fn parse_millis(key: &str, value: &str) -> QueueResult<Duration> {
    let value = value.trim();
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> QueueError {
    QueueError::configuration(format!("invalid value `{value}` for {ENV_PREFIX}{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_type, RetryType::Exponential);
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert_eq!(config.stop_poll_interval, Duration::from_millis(100));
        assert_eq!(config.wait_poll_interval, Duration::from_millis(300));
        assert!(matches!(config.retry_delay, RetryDelay::Fixed(d) if d == Duration::from_secs(1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let config = EngineConfig::from_vars([
            ("DOG_JOBS__MAX_RETRIES", "5"),
            ("DOG_JOBS__RETRY_DELAY_MS", "100,200"),
            ("DOG_JOBS__RETRY_TYPE", "Fixed"),
            ("DOG_JOBS__STOP_TIMEOUT_MS", "1500"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_type, RetryType::Fixed);
        assert_eq!(config.stop_timeout, Duration::from_millis(1500));
        match config.retry_delay {
            RetryDelay::PerAttempt(delays) => {
                assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)])
            }
            other => panic!("unexpected delay {other:?}"),
        }
    }

    #[test]
    fn single_delay_parses_as_fixed() {
        let delay: RetryDelay = "250".parse().unwrap();
        assert!(matches!(delay, RetryDelay::Fixed(d) if d == Duration::from_millis(250)));
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let err = EngineConfig::from_vars([("DOG_JOBS__MAX_RETRIES", "many")]).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(ref msg) if msg.contains("MAX_RETRIES")));

        let err = EngineConfig::from_vars([("DOG_JOBS__RETRY_TYPE", "linear")]).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));

        let err = EngineConfig::from_vars([("DOG_JOBS__STOP_POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
    }

    #[test]
    fn empty_per_attempt_delays_are_rejected() {
        let config = EngineConfig::default().with_retry_delay(RetryDelay::PerAttempt(Vec::new()));
        assert!(config.validate().is_err());
    }
}
