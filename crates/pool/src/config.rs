//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shortest interval the reaper will tick at.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a resource pool
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of resources alive at once (idle + checked out)
    pub max_active: usize,
    /// Maximum number of idle resources kept for reuse
    pub max_idle: usize,
    /// Idle resources older than this are reaped. Zero disables idle reaping.
    pub max_idle_time: Duration,
    /// How often the reaper scans the idle set. Defaults to half the expiry.
    /// Only valid together with a non-zero `max_idle_time` or a `max_lifetime`.
    pub reap_interval: Option<Duration>,
    /// Resources older than this are never reused
    pub max_lifetime: Option<Duration>,
    /// Wait budget for acquires whose context has no deadline
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 10,
            max_idle_time: Duration::from_secs(600),
            reap_interval: None,
            max_lifetime: None,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Config for a pool of `max_active` resources, all of which may idle.
    #[must_use]
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            max_idle: max_active,
            ..Self::default()
        }
    }

    /// Set the idle cap.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the idle expiry. `Duration::ZERO` disables idle reaping.
    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    /// Override the reaper tick.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = Some(interval);
        self
    }

    /// Cap the age of any resource.
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Bound acquires that carry no deadline of their own.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_active == 0 {
            return Err(Error::configuration("max_active must be greater than 0"));
        }
        if self.max_idle > self.max_active {
            return Err(Error::configuration(format!(
                "max_idle ({}) must not exceed max_active ({})",
                self.max_idle, self.max_active
            )));
        }
        if self.reap_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::configuration(
                "reap_interval must be greater than zero",
            ));
        }
        if self.max_lifetime.is_some_and(|d| d.is_zero()) {
            return Err(Error::configuration(
                "max_lifetime must be greater than zero",
            ));
        }
        if self.acquire_timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        if self.reap_interval.is_some()
            && self.max_idle_time.is_zero()
            && self.max_lifetime.is_none()
        {
            return Err(Error::configuration(
                "reap_interval is set but nothing expires: set max_idle_time or max_lifetime",
            ));
        }
        Ok(())
    }

    /// Interval the reaper ticks at, or `None` when nothing ever expires.
    #[must_use]
    pub fn effective_reap_interval(&self) -> Option<Duration> {
        let expiry = if self.max_idle_time.is_zero() {
            self.max_lifetime?
        } else {
            self.max_idle_time
        };
        let interval = self.reap_interval.unwrap_or(expiry / 2);
        Some(interval.max(MIN_REAP_INTERVAL))
    }

    /// Whether an entry last used at `idle_for` ago and created `age` ago
    /// should be evicted.
    pub(crate) fn is_expired(&self, idle_for: Duration, age: Duration) -> bool {
        (!self.max_idle_time.is_zero() && idle_for > self.max_idle_time)
            || self.max_lifetime.is_some_and(|lifetime| age > lifetime)
    }

    pub(crate) fn is_past_lifetime(&self, age: Duration) -> bool {
        self.max_lifetime.is_some_and(|lifetime| age > lifetime)
    }
}
