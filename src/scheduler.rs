//! Measurement scheduler and lifecycle control
//!
//! Tracks at most one tester loop per target. `start()` brings the set of
//! loops in line with the registry and can be called any number of times;
//! the reconciler calls it periodically so targets added or removed by
//! another process are picked up.
//!
//! A target stopped with `stop_target` stays stopped until `start_target`
//! is called for it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::actors::messages::SchedulerEvent;
use crate::actors::tester::{ScheduleState, TesterContext, TesterHandle};
use crate::config::SchedulerConfig;
use crate::error::MonitorError;
use crate::probe::Probe;
use crate::registry::TargetRegistry;
use crate::results::ResultStore;
use crate::storage::{ResultRecord, StorageResult};
use crate::target::{Target, TargetId};

struct LoopEntry {
    handle: TesterHandle,
    task: JoinHandle<()>,

    /// Schedule the loop was last given
    target: Target,
}

#[derive(Default)]
struct LoopTable {
    loops: HashMap<TargetId, LoopEntry>,

    /// Targets explicitly stopped; `start()` leaves them alone
    stopped: HashSet<TargetId>,
}

pub struct Scheduler {
    ctx: TesterContext,
    table: Mutex<LoopTable>,
    stop_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        registry: TargetRegistry,
        results: ResultStore,
        probe: Arc<dyn Probe>,
        config: &SchedulerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            ctx: TesterContext {
                probe,
                registry,
                results,
                event_tx,
            },
            table: Mutex::default(),
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Ensure exactly one loop per registered target that was not stopped
    ///
    /// Finished loops are reaped, loops of vanished targets are stopped and
    /// their series deleted, changed schedules are forwarded. Returns the
    /// number of active loops.
    #[instrument(skip(self))]
    pub async fn start(&self) -> StorageResult<usize> {
        let mut table = self.table.lock().await;
        let targets = self.ctx.registry.list().await?;

        let wanted: HashSet<TargetId> = targets.iter().map(Target::id).collect();
        table.stopped.retain(|id| wanted.contains(id));

        let vanished: Vec<TargetId> = table
            .loops
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        if !vanished.is_empty() {
            info!("stopping {} loop(s) for removed targets", vanished.len());
            let entries: Vec<LoopEntry> = vanished
                .iter()
                .filter_map(|id| table.loops.remove(id))
                .collect();
            self.stop_entries(entries).await;

            // The loop may have appended after the series was deleted elsewhere
            for id in &vanished {
                match self.ctx.results.delete_series(&id.results_location()).await {
                    Ok(0) => {}
                    Ok(n) => debug!("deleted {n} late result(s) of {id}"),
                    Err(e) => warn!("could not delete results of {id}: {e}"),
                }
            }
        }

        table.loops.retain(|id, entry| {
            let finished = entry.task.is_finished();
            if finished {
                debug!("reaping finished loop for {id}");
            }
            !finished
        });

        for target in targets {
            if table.stopped.contains(&target.id()) {
                continue;
            }
            self.ensure_loop(&mut table.loops, target).await;
        }

        trace!("{} loop(s) active", table.loops.len());
        Ok(table.loops.len())
    }

    /// Ensure one loop for `target`, lifting an earlier `stop_target`
    pub async fn start_target(&self, target: Target) {
        let mut table = self.table.lock().await;
        table.stopped.remove(&target.id());
        self.ensure_loop(&mut table.loops, target).await;
    }

    /// Let `start()` pick `id` up again without starting it now
    pub async fn clear_stopped(&self, id: &TargetId) {
        self.table.lock().await.stopped.remove(id);
    }

    pub async fn is_stopped(&self, id: &TargetId) -> bool {
        self.table.lock().await.stopped.contains(id)
    }

    async fn ensure_loop(&self, loops: &mut HashMap<TargetId, LoopEntry>, target: Target) {
        let id = target.id();

        if let Some(entry) = loops.get_mut(&id) {
            if !entry.task.is_finished() {
                if !entry.target.same_schedule(&target) {
                    if let Err(e) = entry
                        .handle
                        .update_schedule(target.duration, target.interval)
                        .await
                    {
                        warn!("could not forward schedule change: {e}");
                    }
                    entry.target = target;
                }
                return;
            }
            debug!("previous loop for {id} has exited, replacing it");
        }

        info!(
            "starting loop for {id} ({}s every {}m)",
            target.duration, target.interval
        );
        let (handle, task) = TesterHandle::spawn(target.clone(), self.ctx.clone());
        loops.insert(
            id,
            LoopEntry {
                handle,
                task,
                target,
            },
        );
    }

    /// Stop the loop for `id`, wait for it to exit and keep it stopped
    ///
    /// Returns whether a loop was tracked.
    #[instrument(skip(self), fields(target = %id))]
    pub async fn stop_target(&self, id: &TargetId) -> bool {
        let entry = {
            let mut table = self.table.lock().await;
            table.stopped.insert(id.clone());
            table.loops.remove(id)
        };
        match entry {
            Some(entry) => {
                self.stop_entry(entry).await;
                true
            }
            None => false,
        }
    }

    /// Stop every loop; used on shutdown
    pub async fn stop_all(&self) {
        let entries: Vec<LoopEntry> = {
            let mut table = self.table.lock().await;
            table.stopped.clear();
            table.loops.drain().map(|(_, e)| e).collect()
        };
        if !entries.is_empty() {
            info!("stopping {} loop(s)", entries.len());
        }
        self.stop_entries(entries).await;
    }

    /// Unregister a target, stop its loop and delete its results
    ///
    /// The loop lock is held throughout so a concurrent `start()` cannot
    /// bring the loop back.
    #[instrument(skip(self), fields(target = %id))]
    pub async fn remove_target(&self, id: &TargetId) -> Result<bool, MonitorError> {
        let mut table = self.table.lock().await;

        let removed = self.ctx.registry.remove(id).await?;
        table.stopped.remove(id);
        if let Some(entry) = table.loops.remove(id) {
            self.stop_entry(entry).await;
        }

        let deleted = self.ctx.results.delete_series(&id.results_location()).await?;
        debug!("deleted {deleted} result(s)");

        Ok(removed)
    }

    async fn stop_entries(&self, entries: Vec<LoopEntry>) {
        join_all(entries.into_iter().map(|entry| self.stop_entry(entry))).await;
    }

    async fn stop_entry(&self, entry: LoopEntry) {
        let LoopEntry {
            handle, mut task, ..
        } = entry;

        handle.cancel();

        match tokio::time::timeout(self.stop_timeout, &mut task).await {
            Ok(Ok(())) => debug!("loop for {} stopped", handle.target),
            Ok(Err(e)) => error!("loop for {} ended abnormally: {e}", handle.target),
            Err(_) => {
                warn!(
                    "loop for {} did not stop within {}s, aborting",
                    handle.target,
                    self.stop_timeout.as_secs()
                );
                task.abort();
                let _ = task.await;
            }
        }
    }

    pub async fn is_running(&self, id: &TargetId) -> bool {
        self.table
            .lock()
            .await
            .loops
            .get(id)
            .is_some_and(|entry| !entry.task.is_finished())
    }

    /// Targets with an active loop, sorted
    pub async fn running(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self
            .table
            .lock()
            .await
            .loops
            .iter()
            .filter(|(_, entry)| !entry.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn handle(&self, id: &TargetId) -> Option<TesterHandle> {
        self.table
            .lock()
            .await
            .loops
            .get(id)
            .map(|entry| entry.handle.clone())
    }

    pub async fn state(&self, id: &TargetId) -> Option<ScheduleState> {
        self.handle(id).await.map(|handle| handle.state())
    }

    /// Probe `id` through its loop, after any probe already in flight
    pub async fn test_now(&self, id: &TargetId) -> Result<ResultRecord, MonitorError> {
        let handle = self
            .handle(id)
            .await
            .ok_or_else(|| MonitorError::NotRunning(id.to_string()))?;
        handle.test_now().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.ctx.event_tx.subscribe()
    }

    /// Call `start()` every `every` until `cancel` fires
    pub fn spawn_reconciler(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; start() already ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.start().await {
                            error!("failed to reconcile with the registry: {e}");
                        }
                    }
                }
            }

            debug!("reconciler stopped");
        })
    }
}
