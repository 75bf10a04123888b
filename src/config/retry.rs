use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_CONNECTION_TIMEOUT_MS;
use crate::constants::DEFAULT_RETRY_INTERVAL_MS;
use crate::constants::DEFAULT_RETRY_TIMEOUT_MS;
use crate::constants::SLOW_PLATFORM_TIMEOUT_MULTIPLIER;
use crate::Error;
use crate::Result;

/// Wall-clock retry template used by [`crate::RetryExecutor`]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up once this much time has passed since the first attempt (unit: milliseconds)
    #[serde(default = "default_retry_timeout_ms")]
    pub timeout_ms: u64,

    /// Fixed pause between attempts (unit: milliseconds)
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_retry_timeout_ms(),
            interval_ms: default_retry_interval_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "retry.interval_ms must be greater than 0".into(),
            ));
        }
        if self.interval_ms > self.timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.interval_ms ({}) exceeds retry.timeout_ms ({})",
                self.interval_ms, self.timeout_ms
            )));
        }
        Ok(())
    }
}

/// How long patient connections wait for a freshly started cluster
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Unit: milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub timeout_ms: u64,

    /// Applied on platforms where node start-up is notably slower (Windows)
    #[serde(default = "default_slow_platform_multiplier")]
    pub slow_platform_multiplier: u32,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_connection_timeout_ms(),
            slow_platform_multiplier: default_slow_platform_multiplier(),
        }
    }
}

impl ConnectionPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Scales `timeout` for the current platform.
    pub fn effective(
        &self,
        timeout: Duration,
    ) -> Duration {
        if cfg!(windows) {
            timeout * self.slow_platform_multiplier
        } else {
            timeout
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "connection.timeout_ms must be greater than 0".into(),
            ));
        }
        if self.slow_platform_multiplier == 0 {
            return Err(Error::InvalidConfig(
                "connection.slow_platform_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_retry_timeout_ms() -> u64 {
    DEFAULT_RETRY_TIMEOUT_MS
}
fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}
fn default_connection_timeout_ms() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_MS
}
fn default_slow_platform_multiplier() -> u32 {
    SLOW_PLATFORM_TIMEOUT_MULTIPLIER
}
