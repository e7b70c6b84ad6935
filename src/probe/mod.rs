//! Throughput probe adapter
//!
//! A probe runs one bounded throughput measurement against a target and
//! reports sent/received Mbps, or a normalized [`ProbeError`]. Probes never
//! retry; the scheduler decides what happens after a failure.
//!
//! Implementations must:
//! - return within roughly the requested duration plus a fixed setup allowance
//! - observe the cancellation token and return [`ProbeErrorKind::Cancelled`]
//!   promptly once it fires

pub mod iperf;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::target::Target;

pub use iperf::Iperf3Probe;

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Parameters of one probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub hostname: String,
    pub port: u16,
    pub duration: Duration,
}

impl ProbeRequest {
    pub fn new(hostname: impl Into<String>, port: u16, duration: Duration) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            duration,
        }
    }
}

impl From<&Target> for ProbeRequest {
    fn from(target: &Target) -> Self {
        Self::new(target.hostname.as_str(), target.port, target.probe_duration())
    }
}

/// A successful probe run
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub sent_mbps: f64,
    pub received_mbps: f64,

    /// When the run completed
    pub timestamp: DateTime<Utc>,

    /// Per-interval breakdown, when the probe reports one. Never stored.
    pub intervals: Vec<IntervalSample>,
}

/// Throughput over one reporting interval of a run
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct IntervalSample {
    /// Offset of the interval start, in seconds
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
}

impl IntervalSample {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1e6
    }

    pub fn mbps(&self) -> f64 {
        self.bits_per_second / 1e6
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// Connection refused, resolution failure or timeout
    Unreachable,

    /// The server is already running a test for someone else
    Busy,

    /// The probe produced output that could not be understood
    ProtocolError,

    /// The caller aborted the run
    Cancelled,
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeErrorKind::Unreachable => write!(f, "unreachable"),
            ProbeErrorKind::Busy => write!(f, "busy"),
            ProbeErrorKind::ProtocolError => write!(f, "protocol error"),
            ProbeErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Unreachable, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Busy, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::ProtocolError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ProbeErrorKind::Cancelled, "probe cancelled")
    }

    /// Whether the scheduler should simply try again next interval
    pub fn is_retryable(&self) -> bool {
        self.kind != ProbeErrorKind::Cancelled
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe failed ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ProbeError {}

/// A black-box throughput measurement
#[async_trait]
pub trait Probe: Send + Sync {
    async fn measure(
        &self,
        request: &ProbeRequest,
        cancel: &CancellationToken,
    ) -> ProbeResult<Measurement>;
}
