//! Message types for actor communication
//!
//! 1. **Commands**: sent to one tester loop via its mpsc channel
//! 2. **Events**: broadcast by every loop to any number of subscribers

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::MonitorError;
use crate::probe::{Measurement, ProbeErrorKind, ProbeResult};
use crate::storage::ResultRecord;
use crate::target::TargetId;

/// Event published by a tester loop
///
/// The broadcast channel may lag for slow subscribers. Dropped events are
/// fine: the result store is the record of truth.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A measurement was appended to the target's series
    Recorded {
        target: TargetId,
        record: ResultRecord,
    },

    /// A probe failed; nothing was appended
    Failed {
        target: TargetId,
        kind: ProbeErrorKind,
        message: String,
        consecutive_failures: u32,
        at: DateTime<Utc>,
    },

    /// The loop for this target exited
    Stopped { target: TargetId },
}

impl SchedulerEvent {
    pub fn target(&self) -> &TargetId {
        match self {
            SchedulerEvent::Recorded { target, .. }
            | SchedulerEvent::Failed { target, .. }
            | SchedulerEvent::Stopped { target } => target,
        }
    }
}

/// Commands that can be sent to a tester loop
#[derive(Debug)]
pub enum TesterCommand {
    /// Run a probe now instead of waiting for the interval
    ///
    /// Served after any in-flight probe completes.
    TestNow {
        respond_to: oneshot::Sender<Result<ResultRecord, MonitorError>>,
    },

    /// Run a short probe of `duration` and report it; nothing is stored
    ///
    /// Served between scheduled probes, like `TestNow`.
    Check {
        duration: Duration,
        respond_to: oneshot::Sender<ProbeResult<Measurement>>,
    },

    /// Adopt a new duration (seconds) and interval (minutes)
    UpdateSchedule { duration: u32, interval: u32 },

    /// Exit after the current probe, if any
    Shutdown,
}
