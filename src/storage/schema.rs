//! Stored record definitions
//!
//! Two tables back the monitor:
//!
//! - `targets`: one row per `(hostname, port)` with its duration, interval and
//!   derived results location.
//! - `results`: one row per completed measurement, keyed by the series
//!   (results location) and a timestamp in seconds since the epoch.
//!
//! Failed probes never produce a row, so every stored result carries real
//! numbers and the series schema stays uniform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed measurement in a target's series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Seconds since the epoch
    pub timestamp: i64,

    /// Sent throughput in Mbps
    pub sent_mbps: f64,

    /// Received throughput in Mbps
    pub received_mbps: f64,
}

impl ResultRecord {
    /// Build a record, rounding throughput to two decimals and clamping
    /// negative or non-finite values to zero
    pub fn new(timestamp: i64, sent_mbps: f64, received_mbps: f64) -> Self {
        Self {
            timestamp,
            sent_mbps: round_mbps(sent_mbps),
            received_mbps: round_mbps(received_mbps),
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

fn round_mbps(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// Outcome of a registry upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// No entry existed for this identity
    Inserted,

    /// The entry existed with a different duration or interval
    Updated,

    /// The entry already had exactly these values
    Unchanged,
}

/// Aggregate view of one series, used for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub count: usize,
    pub mean_sent_mbps: Option<f64>,
    pub mean_received_mbps: Option<f64>,
    pub last_timestamp: Option<i64>,

    /// No result within two intervals (or none at all)
    pub stale: bool,
}

impl SeriesSummary {
    /// Summarize `records` for a target re-tested every `interval_secs`
    pub fn from_records(records: &[ResultRecord], interval_secs: i64, now: i64) -> Self {
        let count = records.len();
        let last_timestamp = records.iter().map(|r| r.timestamp).max();

        let (mean_sent_mbps, mean_received_mbps) = if count == 0 {
            (None, None)
        } else {
            let sent: f64 = records.iter().map(|r| r.sent_mbps).sum();
            let received: f64 = records.iter().map(|r| r.received_mbps).sum();
            (
                Some(round_mbps(sent / count as f64)),
                Some(round_mbps(received / count as f64)),
            )
        };

        let stale = match last_timestamp {
            Some(last) => now - last > interval_secs * 2,
            None => true,
        };

        Self {
            count,
            mean_sent_mbps,
            mean_received_mbps,
            last_timestamp,
            stale,
        }
    }
}
