//! TargetTesterActor - one measurement loop per target
//!
//! ## Message Flow
//!
//! ```text
//! Due time → Re-read target → Probe → Append result → Publish SchedulerEvent
//!     ↑                                                     │
//!     └──────────── re-arm at attempt + interval ───────────┘
//!
//! Commands (TestNow, UpdateSchedule, Shutdown) and the cancellation token
//! are served between probes. A probe in flight is cancelled through the
//! probe's own cancellation path.
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::MonitorError;
use crate::probe::{Measurement, Probe, ProbeError, ProbeErrorKind, ProbeRequest, ProbeResult};
use crate::registry::TargetRegistry;
use crate::results::ResultStore;
use crate::storage::ResultRecord;
use crate::target::{Target, TargetId};
use crate::util::unix_now;

use super::messages::{SchedulerEvent, TesterCommand};

/// Observable state of one loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,

    /// A probe is in flight
    pub running: bool,

    /// Failed probes since the last success
    pub consecutive_failures: u32,
}

/// Shared pieces every tester loop needs
#[derive(Clone)]
pub struct TesterContext {
    pub probe: Arc<dyn Probe>,
    pub registry: TargetRegistry,
    pub results: ResultStore,
    pub event_tx: broadcast::Sender<SchedulerEvent>,
}

/// Actor that measures a single target at its interval
pub struct TargetTesterActor {
    target: Target,

    ctx: TesterContext,

    command_rx: mpsc::Receiver<TesterCommand>,

    cancel: CancellationToken,

    state_tx: watch::Sender<ScheduleState>,

    /// When the next scheduled probe is due
    next_due: Instant,

    /// Start of the most recent probe run by this loop
    last_started: Option<Instant>,
}

impl TargetTesterActor {
    fn new(
        target: Target,
        ctx: TesterContext,
        command_rx: mpsc::Receiver<TesterCommand>,
        cancel: CancellationToken,
        state_tx: watch::Sender<ScheduleState>,
    ) -> Self {
        Self {
            target,
            ctx,
            command_rx,
            cancel,
            state_tx,
            next_due: Instant::now(),
            last_started: None,
        }
    }

    /// Run the loop until cancelled, shut down, or the target disappears
    #[instrument(skip(self), fields(target = %self.target.id()))]
    pub async fn run(mut self) {
        debug!("starting tester loop");

        self.next_due = self.resume().await;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancelled");
                    break;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(TesterCommand::TestNow { respond_to }) => {
                        debug!("received TestNow command");
                        if !self.refresh_target().await {
                            info!("target no longer registered, stopping");
                            let _ = respond_to.send(Err(self.unknown()));
                            break;
                        }
                        let result = self.run_once().await;
                        let gone = is_unknown(&result);
                        let _ = respond_to.send(result);
                        if gone {
                            break;
                        }
                    }

                    Some(TesterCommand::Check { duration, respond_to }) => {
                        debug!("received Check command");
                        let _ = respond_to.send(self.check(duration).await);
                    }

                    Some(TesterCommand::UpdateSchedule { duration, interval }) => {
                        self.apply_schedule(duration, interval);
                    }

                    Some(TesterCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }

                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },

                _ = sleep_until(self.next_due) => {
                    if !self.refresh_target().await {
                        info!("target no longer registered, stopping");
                        break;
                    }
                    if is_unknown(&self.run_once().await) {
                        break;
                    }
                }
            }
        }

        self.state_tx.send_modify(|state| state.running = false);
        let _ = self.ctx.event_tx.send(SchedulerEvent::Stopped {
            target: self.target.id(),
        });

        debug!("tester loop stopped");
    }

    /// Work out the first due time from the stored history
    async fn resume(&self) -> Instant {
        let now = Instant::now();
        let last = match self.ctx.results.last_timestamp(&self.target.results_location).await {
            Ok(Some(last)) => last,
            Ok(None) => return now,
            Err(e) => {
                warn!("could not read last result, testing immediately: {e}");
                return now;
            }
        };

        let last_attempt = DateTime::from_timestamp(last, 0);
        self.state_tx.send_modify(|state| {
            state.last_attempt = last_attempt;
            state.last_success = last_attempt;
        });

        let elapsed = Duration::from_secs((unix_now() - last).max(0) as u64);
        let interval = self.target.interval_duration();
        match interval.checked_sub(elapsed) {
            Some(remaining) => {
                debug!("last result {}s ago, next test in {}s", elapsed.as_secs(), remaining.as_secs());
                now + remaining
            }
            None => now,
        }
    }

    /// Re-read the target from the registry
    ///
    /// Returns false if it was removed. A failed read keeps the current values.
    async fn refresh_target(&mut self) -> bool {
        match self.ctx.registry.get(&self.target.id()).await {
            Ok(Some(target)) => {
                if !target.same_schedule(&self.target) {
                    debug!(
                        "schedule changed to {}s every {}m",
                        target.duration, target.interval
                    );
                    self.target = target;
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("could not refresh target, keeping current schedule: {e}");
                true
            }
        }
    }

    fn unknown(&self) -> MonitorError {
        MonitorError::UnknownTarget(self.target.id().to_string())
    }

    /// Short unscheduled probe; the outcome is only reported back
    async fn check(&self, duration: Duration) -> ProbeResult<Measurement> {
        let request = ProbeRequest::new(self.target.hostname.as_str(), self.target.port, duration);

        self.state_tx.send_modify(|state| state.running = true);
        let result = self.ctx.probe.measure(&request, &self.cancel).await;
        self.state_tx.send_modify(|state| state.running = false);

        result
    }

    fn apply_schedule(&mut self, duration: u32, interval: u32) {
        if self.target.duration == duration && self.target.interval == interval {
            return;
        }

        debug!("updating schedule to {duration}s every {interval}m");

        self.target.duration = duration;
        self.target.interval = interval;

        if let Some(started) = self.last_started {
            self.next_due = started + self.target.interval_duration();
        }
    }

    /// Run one probe and record its outcome
    async fn run_once(&mut self) -> Result<ResultRecord, MonitorError> {
        let started = Instant::now();
        self.last_started = Some(started);
        self.next_due = started + self.target.interval_duration();
        self.state_tx.send_modify(|state| {
            state.running = true;
            state.last_attempt = Some(Utc::now());
        });

        let request = ProbeRequest::from(&self.target);
        trace!("probing for {}s", request.duration.as_secs());
        let outcome = self.ctx.probe.measure(&request, &self.cancel).await;

        self.state_tx.send_modify(|state| state.running = false);

        let measurement = match outcome {
            Ok(_) if self.cancel.is_cancelled() => {
                debug!("discarding result of cancelled run");
                return Err(ProbeError::cancelled().into());
            }
            Ok(measurement) => measurement,
            Err(e) if e.kind == ProbeErrorKind::Cancelled => {
                debug!("probe cancelled");
                return Err(e.into());
            }
            Err(e) => {
                let mut failures = 0;
                self.state_tx.send_modify(|state| {
                    state.consecutive_failures += 1;
                    failures = state.consecutive_failures;
                });

                warn!("{e} ({failures} in a row), retrying in {}m", self.target.interval);

                let _ = self.ctx.event_tx.send(SchedulerEvent::Failed {
                    target: self.target.id(),
                    kind: e.kind,
                    message: e.message.clone(),
                    consecutive_failures: failures,
                    at: Utc::now(),
                });
                return Err(e.into());
            }
        };

        // A removal elsewhere may have deleted the series while the probe ran
        if let Ok(None) = self.ctx.registry.get(&self.target.id()).await {
            info!("target removed during the run, discarding result");
            return Err(self.unknown());
        }

        let record = match self
            .ctx
            .results
            .append(&self.target.results_location, &measurement)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!("failed to store result: {e}");
                return Err(e.into());
            }
        };

        info!(
            "sent {:.2} Mbps, received {:.2} Mbps",
            record.sent_mbps, record.received_mbps
        );

        self.state_tx.send_modify(|state| {
            state.consecutive_failures = 0;
            state.last_success = record.datetime();
        });

        match self.ctx.event_tx.send(SchedulerEvent::Recorded {
            target: self.target.id(),
            record,
        }) {
            Ok(receivers) => trace!("published result to {receivers} receivers"),
            Err(_) => trace!("no receivers for result"),
        }

        Ok(record)
    }
}

/// The loop's target was removed from the registry
fn is_unknown<T>(result: &Result<T, MonitorError>) -> bool {
    matches!(result, Err(MonitorError::UnknownTarget(_)))
}

/// Handle for controlling a TargetTesterActor
#[derive(Clone)]
pub struct TesterHandle {
    sender: mpsc::Sender<TesterCommand>,

    cancel: CancellationToken,

    state: watch::Receiver<ScheduleState>,

    pub target: TargetId,
}

impl TesterHandle {
    /// Spawn a loop for `target`
    pub fn spawn(target: Target, ctx: TesterContext) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ScheduleState::default());
        let cancel = CancellationToken::new();

        let id = target.id();
        let actor = TargetTesterActor::new(target, ctx, cmd_rx, cancel.clone(), state_tx);
        let task = tokio::spawn(actor.run());

        let handle = Self {
            sender: cmd_tx,
            cancel,
            state: state_rx,
            target: id,
        };

        (handle, task)
    }

    /// Probe now, after any in-flight probe, and return the stored record
    pub async fn test_now(&self) -> Result<ResultRecord, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TesterCommand::TestNow { respond_to: tx })
            .await
            .map_err(|_| MonitorError::LoopGone(self.target.to_string()))?;

        rx.await
            .map_err(|_| MonitorError::LoopGone(self.target.to_string()))?
    }

    /// Short probe served by the loop, so it never overlaps a scheduled one
    ///
    /// The outer error means the loop is gone.
    pub async fn check(&self, duration: Duration) -> Result<ProbeResult<Measurement>, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TesterCommand::Check {
                duration,
                respond_to: tx,
            })
            .await
            .map_err(|_| MonitorError::LoopGone(self.target.to_string()))?;

        rx.await
            .map_err(|_| MonitorError::LoopGone(self.target.to_string()))
    }

    pub async fn update_schedule(&self, duration: u32, interval: u32) -> Result<(), MonitorError> {
        self.sender
            .send(TesterCommand::UpdateSchedule { duration, interval })
            .await
            .map_err(|_| MonitorError::LoopGone(self.target.to_string()))
    }

    /// Ask the loop to exit once it is idle
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.sender
            .send(TesterCommand::Shutdown)
            .await
            .map_err(|_| MonitorError::LoopGone(self.target.to_string()))
    }

    /// Stop the loop, aborting any probe in flight
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> ScheduleState {
        self.state.borrow().clone()
    }
}
