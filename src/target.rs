//! Measurement targets and their identity
//!
//! A target is a remote iperf3 endpoint addressed by `(hostname, port)`.
//! Its result series lives under a location derived from that identity, so
//! the same target always maps to the same series across restarts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Shortest accepted probe run, in seconds
pub const MIN_DURATION_SECS: u32 = 1;

/// Longest accepted probe run, in seconds
pub const MAX_DURATION_SECS: u32 = 300;

/// Shortest accepted re-test cadence, in minutes
pub const MIN_INTERVAL_MINS: u32 = 1;

/// Longest accepted re-test cadence, in minutes
pub const MAX_INTERVAL_MINS: u32 = 60;

/// Longest hostname accepted (DNS limit)
const MAX_HOSTNAME_LEN: usize = 253;

/// Unique key of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId {
    pub hostname: String,
    pub port: u16,
}

impl TargetId {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Series key for this target's results
    ///
    /// Every character of the hostname that is not ASCII alphanumeric becomes
    /// `_`, followed by `_<port>`: `10.0.0.5:5201` maps to `10_0_0_5_5201`.
    pub fn results_location(&self) -> String {
        let host: String = self
            .hostname
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{host}_{}", self.port)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// A configured target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub hostname: String,
    pub port: u16,

    /// Probe run length in seconds
    pub duration: u32,

    /// Re-test cadence in minutes
    pub interval: u32,

    /// Derived from `(hostname, port)`, never set by hand
    pub results_location: String,
}

impl Target {
    /// Build a validated target
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        duration: u32,
        interval: u32,
    ) -> Result<Self, ConfigError> {
        let hostname = hostname.into().trim().to_string();
        validate_hostname(&hostname)?;

        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }

        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration) {
            return Err(ConfigError::DurationOutOfRange(duration));
        }

        if !(MIN_INTERVAL_MINS..=MAX_INTERVAL_MINS).contains(&interval) {
            return Err(ConfigError::IntervalOutOfRange(interval));
        }

        let results_location = TargetId::new(hostname.as_str(), port).results_location();

        Ok(Self {
            hostname,
            port,
            duration,
            interval,
            results_location,
        })
    }

    pub fn id(&self) -> TargetId {
        TargetId::new(self.hostname.as_str(), self.port)
    }

    /// How long a single probe runs
    pub fn probe_duration(&self) -> Duration {
        Duration::from_secs(self.duration as u64)
    }

    /// Time between two attempts
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval as u64 * 60)
    }

    /// Same identity, same schedule
    pub fn same_schedule(&self, other: &Target) -> bool {
        self.duration == other.duration && self.interval == other.interval
    }
}

fn validate_hostname(hostname: &str) -> Result<(), ConfigError> {
    if hostname.is_empty() {
        return Err(ConfigError::EmptyHostname);
    }

    if hostname.len() > MAX_HOSTNAME_LEN
        || hostname
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/')
    {
        return Err(ConfigError::InvalidHostname(hostname.to_string()));
    }

    Ok(())
}
