//! Error types for the control surface

use std::fmt;

use crate::probe::ProbeError;
use crate::storage::StorageError;

/// Invalid target parameters, rejected before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyHostname,
    InvalidHostname(String),
    InvalidPort(u16),

    /// Probe duration outside 1-300 seconds
    DurationOutOfRange(u32),

    /// Interval outside 1-60 minutes
    IntervalOutOfRange(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyHostname => write!(f, "hostname must not be empty"),
            ConfigError::InvalidHostname(host) => write!(f, "invalid hostname: {host:?}"),
            ConfigError::InvalidPort(port) => write!(f, "invalid port: {port}"),
            ConfigError::DurationOutOfRange(secs) => {
                write!(f, "duration must be between 1 and 300 seconds, got {secs}")
            }
            ConfigError::IntervalOutOfRange(mins) => {
                write!(f, "interval must be between 1 and 60 minutes, got {mins}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors surfaced by [`crate::monitor::Monitor`] and the scheduler
#[derive(Debug)]
pub enum MonitorError {
    /// Target parameters were rejected
    Config(ConfigError),

    /// Registry or result store failure
    Storage(StorageError),

    /// A directly requested probe failed
    Probe(ProbeError),

    /// The target is not in the registry
    UnknownTarget(String),

    /// No measurement loop is tracked for this target
    NotRunning(String),

    /// The measurement loop went away while handling a request
    LoopGone(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Config(err) => write!(f, "invalid target: {err}"),
            MonitorError::Storage(err) => write!(f, "{err}"),
            MonitorError::Probe(err) => write!(f, "{err}"),
            MonitorError::UnknownTarget(target) => write!(f, "unknown target {target}"),
            MonitorError::NotRunning(target) => write!(f, "no measurement loop for {target}"),
            MonitorError::LoopGone(target) => {
                write!(f, "measurement loop for {target} stopped unexpectedly")
            }
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Config(err) => Some(err),
            MonitorError::Storage(err) => Some(err),
            MonitorError::Probe(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for MonitorError {
    fn from(err: ConfigError) -> Self {
        MonitorError::Config(err)
    }
}

impl From<StorageError> for MonitorError {
    fn from(err: StorageError) -> Self {
        MonitorError::Storage(err)
    }
}

impl From<ProbeError> for MonitorError {
    fn from(err: ProbeError) -> Self {
        MonitorError::Probe(err)
    }
}
