//! iperf3 client probe
//!
//! Runs the `iperf3` binary in client mode with JSON output and turns the
//! report into a [`Measurement`]:
//!
//! ```text
//! iperf3 --client <host> --port <port> --time <secs> --json --connect-timeout <ms>
//! ```
//!
//! The child process is killed when the run is cancelled or exceeds
//! `duration + setup_allowance`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::{IntervalSample, Measurement, Probe, ProbeError, ProbeRequest, ProbeResult};
use crate::config::ProbeConfig;

static BUSY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)server is busy|busy running a test").expect("busy pattern compiles")
});

static UNREACHABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unable to connect|connection refused|connection reset|no route to host|network is unreachable|host is down|timed out|unable to resolve|name or service not known|temporary failure in name resolution|control socket has closed",
    )
    .expect("unreachable pattern compiles")
});

#[derive(Debug, Deserialize)]
struct Report {
    #[serde(default)]
    intervals: Vec<ReportInterval>,
    end: Option<ReportEnd>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportInterval {
    sum: Option<IntervalSample>,
}

#[derive(Debug, Deserialize)]
struct ReportEnd {
    sum_sent: Option<ReportSum>,
    sum_received: Option<ReportSum>,
}

#[derive(Debug, Deserialize)]
struct ReportSum {
    bits_per_second: f64,
}

/// Probe backed by the `iperf3` command line client
#[derive(Debug, Clone)]
pub struct Iperf3Probe {
    binary: PathBuf,
    setup_allowance: Duration,
}

impl Iperf3Probe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            setup_allowance: config.setup_allowance(),
        }
    }

    /// Hard upper bound for one run
    pub fn ceiling(&self, request: &ProbeRequest) -> Duration {
        request.duration + self.setup_allowance
    }

    fn command(&self, request: &ProbeRequest) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--client")
            .arg(&request.hostname)
            .arg("--port")
            .arg(request.port.to_string())
            .arg("--time")
            .arg(request.duration.as_secs().max(1).to_string())
            .arg("--json")
            .arg("--connect-timeout")
            .arg(self.setup_allowance.as_millis().max(1).to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Probe for Iperf3Probe {
    #[instrument(skip(self, cancel), fields(host = %request.hostname, port = request.port))]
    async fn measure(
        &self,
        request: &ProbeRequest,
        cancel: &CancellationToken,
    ) -> ProbeResult<Measurement> {
        if cancel.is_cancelled() {
            return Err(ProbeError::cancelled());
        }

        let ceiling = self.ceiling(request);
        trace!("running iperf3 with a ceiling of {}s", ceiling.as_secs());

        let child = self.command(request).spawn().map_err(|e| {
            ProbeError::protocol(format!("failed to launch {}: {e}", self.binary.display()))
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("probe cancelled, killing iperf3");
                return Err(ProbeError::cancelled());
            }

            result = tokio::time::timeout(ceiling, child.wait_with_output()) => match result {
                Err(_) => {
                    return Err(ProbeError::unreachable(format!(
                        "no report within {}s",
                        ceiling.as_secs()
                    )));
                }
                Ok(Err(e)) => {
                    return Err(ProbeError::protocol(format!(
                        "failed to collect iperf3 output: {e}"
                    )));
                }
                Ok(Ok(output)) => output,
            }
        };

        let report = parse_report(&output.stdout, &output.stderr)?;

        Ok(Measurement {
            sent_mbps: report.sent_bps / 1e6,
            received_mbps: report.received_bps / 1e6,
            timestamp: Utc::now(),
            intervals: report.intervals,
        })
    }
}

/// Totals and interval breakdown of a successful iperf3 run
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub sent_bps: f64,
    pub received_bps: f64,
    pub intervals: Vec<IntervalSample>,
}

/// Extract throughput from an iperf3 JSON report
///
/// Intervals without a `sum` block are skipped.
pub fn parse_report(stdout: &[u8], stderr: &[u8]) -> ProbeResult<ParsedReport> {
    let report = match serde_json::from_slice::<Report>(stdout) {
        Ok(report) => report,
        Err(e) => {
            let stderr = String::from_utf8_lossy(stderr);
            let stderr = stderr.trim();
            return Err(if stderr.is_empty() {
                ProbeError::protocol(format!("unparseable iperf3 report: {e}"))
            } else {
                classify_error(stderr)
            });
        }
    };

    if let Some(error) = report.error {
        return Err(classify_error(&error));
    }

    let end = report
        .end
        .ok_or_else(|| ProbeError::protocol("iperf3 report has no summary"))?;

    match (end.sum_sent, end.sum_received) {
        (Some(sent), Some(received)) => {
            let valid = |bps: f64| bps.is_finite() && bps >= 0.0;
            if valid(sent.bits_per_second) && valid(received.bits_per_second) {
                Ok(ParsedReport {
                    sent_bps: sent.bits_per_second,
                    received_bps: received.bits_per_second,
                    intervals: report.intervals.into_iter().filter_map(|i| i.sum).collect(),
                })
            } else {
                Err(ProbeError::protocol("iperf3 reported invalid throughput"))
            }
        }
        _ => Err(ProbeError::protocol(
            "iperf3 report is missing sent/received totals",
        )),
    }
}

/// Map an iperf3 error message onto an error kind
pub fn classify_error(message: &str) -> ProbeError {
    if BUSY.is_match(message) {
        ProbeError::busy(message)
    } else if UNREACHABLE.is_match(message) {
        ProbeError::unreachable(message)
    } else {
        ProbeError::protocol(message)
    }
}
