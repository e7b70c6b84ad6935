//! Control surface
//!
//! [`Monitor`] bundles the registry, the result store and the scheduler into
//! one value built by the process entry point. It is what a UI or the CLI
//! talks to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actors::messages::SchedulerEvent;
use crate::actors::tester::ScheduleState;
use crate::config::{Config, ProbeConfig, SchedulerConfig, TargetConfig};
use crate::error::MonitorError;
use crate::probe::{Iperf3Probe, Measurement, Probe, ProbeError, ProbeRequest};
use crate::registry::TargetRegistry;
use crate::results::ResultStore;
use crate::scheduler::Scheduler;
use crate::storage::{
    HealthStatus, ResultRecord, SeriesSummary, StorageBackend, StorageResult, open_backend,
};
use crate::target::{Target, TargetId};
use crate::util::unix_now;

pub struct Monitor {
    backend: Arc<dyn StorageBackend>,
    registry: TargetRegistry,
    results: ResultStore,
    probe: Arc<dyn Probe>,
    scheduler: Arc<Scheduler>,

    /// Whether `start()` has been called (and `shutdown()` has not)
    started: AtomicBool,

    reconciler: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    reconcile_interval: Duration,
    reachability_duration: Duration,
}

impl Monitor {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        probe: Arc<dyn Probe>,
        probe_config: &ProbeConfig,
        scheduler_config: &SchedulerConfig,
    ) -> Self {
        let registry = TargetRegistry::new(backend.clone());
        let results = ResultStore::new(backend.clone());
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            results.clone(),
            probe.clone(),
            scheduler_config,
        ));

        Self {
            backend,
            registry,
            results,
            probe,
            scheduler,
            started: AtomicBool::new(false),
            reconciler: Mutex::default(),
            reconcile_interval: scheduler_config.reconcile_interval(),
            reachability_duration: Duration::from_secs(
                probe_config.reachability_duration_secs.max(1) as u64,
            ),
        }
    }

    /// Open the configured backend and use the iperf3 probe
    pub async fn from_config(config: &Config) -> Result<Self, MonitorError> {
        let backend = open_backend(&config.storage()).await?;
        let probe_config = config.probe();
        let probe = Arc::new(Iperf3Probe::new(&probe_config));

        Ok(Self::new(backend, probe, &probe_config, &config.scheduler()))
    }

    /// Upsert every target from the config file
    pub async fn seed(&self, targets: &[TargetConfig]) -> Result<usize, MonitorError> {
        for target in targets {
            self.registry
                .add(&target.hostname, target.port, target.duration, target.interval)
                .await?;
        }
        Ok(targets.len())
    }

    /// Start one loop per registered target and keep them reconciled
    ///
    /// Calling this again is harmless.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<usize, MonitorError> {
        self.started.store(true, Ordering::SeqCst);
        let active = self.scheduler.start().await?;

        let mut reconciler = self.reconciler.lock().await;
        if reconciler.is_none() {
            let cancel = CancellationToken::new();
            let task = self
                .scheduler
                .spawn_reconciler(self.reconcile_interval, cancel.clone());
            *reconciler = Some((cancel, task));
        }

        info!("monitoring {active} target(s)");
        Ok(active)
    }

    /// Stop all loops and the reconciler, then close storage
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> StorageResult<()> {
        self.started.store(false, Ordering::SeqCst);

        if let Some((cancel, task)) = self.reconciler.lock().await.take() {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!("reconciler ended abnormally: {e}");
            }
        }

        self.scheduler.stop_all().await;
        self.backend.close().await?;

        debug!("monitor shut down");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Add a target or change its duration/interval
    ///
    /// If the monitor is running the change takes effect right away. A
    /// target stopped with [`Monitor::stop_target`] is scheduled again.
    pub async fn add_or_update_target(
        &self,
        hostname: &str,
        port: u16,
        duration: u32,
        interval: u32,
    ) -> Result<Target, MonitorError> {
        let (target, _) = self.registry.add(hostname, port, duration, interval).await?;

        if self.is_started() {
            self.scheduler.start_target(target.clone()).await;
        } else {
            self.scheduler.clear_stopped(&target.id()).await;
        }

        Ok(target)
    }

    /// Remove a target, stop its loop and delete its results
    ///
    /// Removing an unknown target is not an error.
    pub async fn remove_target(&self, hostname: &str, port: u16) -> Result<bool, MonitorError> {
        self.scheduler
            .remove_target(&TargetId::new(hostname.trim(), port))
            .await
    }

    pub async fn list_targets(&self) -> StorageResult<Vec<Target>> {
        self.registry.list().await
    }

    pub async fn get_target(&self, hostname: &str, port: u16) -> StorageResult<Option<Target>> {
        self.registry.get(&TargetId::new(hostname.trim(), port)).await
    }

    pub async fn read_results(&self, hostname: &str, port: u16) -> StorageResult<Vec<ResultRecord>> {
        let series = TargetId::new(hostname.trim(), port).results_location();
        self.results.read(&series).await
    }

    pub async fn read_latest_results(
        &self,
        hostname: &str,
        port: u16,
        limit: usize,
    ) -> StorageResult<Vec<ResultRecord>> {
        let series = TargetId::new(hostname.trim(), port).results_location();
        self.results.read_latest(&series, limit).await
    }

    /// Count, means and staleness of a target's results
    pub async fn summarize(&self, hostname: &str, port: u16) -> Result<SeriesSummary, MonitorError> {
        let id = TargetId::new(hostname.trim(), port);
        let target = self
            .registry
            .get(&id)
            .await?
            .ok_or_else(|| MonitorError::UnknownTarget(id.to_string()))?;

        Ok(self.results.summarize(&target, unix_now()).await?)
    }

    /// One short probe outside the schedule; nothing is stored
    ///
    /// If the target has a loop here the probe is queued behind its
    /// scheduled ones, so the two never run at the same time.
    #[instrument(skip(self))]
    pub async fn test_reachability(
        &self,
        hostname: &str,
        port: u16,
    ) -> Result<Measurement, ProbeError> {
        let id = TargetId::new(hostname.trim(), port);

        let queued = match self.scheduler.handle(&id).await {
            Some(handle) => handle.check(self.reachability_duration).await.ok(),
            None => None,
        };
        let measurement = match queued {
            Some(result) => result?,
            None => {
                let request = ProbeRequest::new(id.hostname.as_str(), port, self.reachability_duration);
                self.probe
                    .measure(&request, &CancellationToken::new())
                    .await?
            }
        };

        debug!("{id} reachable ({:.2} Mbps sent)", measurement.sent_mbps);
        Ok(measurement)
    }

    /// Probe a running target now and store the result
    pub async fn test_now(&self, hostname: &str, port: u16) -> Result<ResultRecord, MonitorError> {
        self.scheduler
            .test_now(&TargetId::new(hostname.trim(), port))
            .await
    }

    /// Stop a target's loop until it is added again or started explicitly
    pub async fn stop_target(&self, hostname: &str, port: u16) -> bool {
        self.scheduler
            .stop_target(&TargetId::new(hostname.trim(), port))
            .await
    }

    /// Restart a target's loop after [`Monitor::stop_target`]
    pub async fn start_target(&self, hostname: &str, port: u16) -> Result<bool, MonitorError> {
        let id = TargetId::new(hostname.trim(), port);
        let Some(target) = self.registry.get(&id).await? else {
            return Err(MonitorError::UnknownTarget(id.to_string()));
        };

        if !self.is_started() {
            self.scheduler.clear_stopped(&id).await;
            return Ok(false);
        }
        self.scheduler.start_target(target).await;
        Ok(true)
    }

    pub async fn is_running(&self, hostname: &str, port: u16) -> bool {
        self.scheduler
            .is_running(&TargetId::new(hostname.trim(), port))
            .await
    }

    pub async fn running(&self) -> Vec<TargetId> {
        self.scheduler.running().await
    }

    pub async fn state(&self, hostname: &str, port: u16) -> Option<ScheduleState> {
        self.scheduler
            .state(&TargetId::new(hostname.trim(), port))
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.scheduler.subscribe()
    }

    pub async fn storage_health(&self) -> StorageResult<HealthStatus> {
        self.backend.health_check().await
    }

    pub async fn storage_stats(&self) -> StorageResult<String> {
        self.backend.get_stats().await
    }
}
