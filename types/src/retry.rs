//! Retry configuration data shape. The backoff/classification logic that
//! consumes this lives in `forge-providers::retry`; this crate only owns
//! the validated config value.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    #[serde(with = "duration_millis")]
    pub http_timeout: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryConfigError {
    #[error("initial_delay must be greater than zero")]
    ZeroInitialDelay,
    #[error("http_timeout must be at least 1 second")]
    TimeoutTooShort,
    #[error("max_delay must be >= initial_delay")]
    MaxDelayBelowInitial,
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        http_timeout: Duration,
    ) -> Result<Self, RetryConfigError> {
        if initial_delay.is_zero() {
            return Err(RetryConfigError::ZeroInitialDelay);
        }
        if http_timeout < Duration::from_secs(1) {
            return Err(RetryConfigError::TimeoutTooShort);
        }
        if max_delay < initial_delay {
            return Err(RetryConfigError::MaxDelayBelowInitial);
        }
        Ok(Self {
            max_retries,
            initial_delay,
            max_delay,
            http_timeout,
        })
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            http_timeout: Duration::from_secs(60),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
