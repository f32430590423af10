//! Run coordinator.
//!
//! Lifecycle: `Idle → Starting → Running → Stopping → Done`, or `Failed`
//! from any state on a fatal error.
//!
//! One [`ResourceWatcher`] task per scope feeds a single fan-in task that
//! owns all writes to the [`Aggregator`]. The first of these ends the
//! collection window:
//! - `stop_after` elapsed
//! - external cancel through a [`CancelHandle`]
//! - quiescence: no record for `quiet_period` once every scope has listed
//! - every requested kind permanently denied
//!
//! Shutdown broadcasts cancel, waits up to `grace_period` for watchers,
//! aborts stragglers, lets the fan-in drain, then writes the snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cluster_source::{ResourceKind, ResourceSource, SourceError, WatchScope};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::aggregator::Aggregator;
use crate::domain::{Result, RunConfig, RunPlan, SyncError};
use crate::logger::SyncLogger;
use crate::metrics::METRICS;
use crate::obs;
use crate::watcher::{cancelled, ResourceWatcher, WatcherExit, WatcherSignal};
use crate::writer::{SnapshotWriter, WriteOutcome};

/// Records buffered between watchers and the fan-in task.
const RECORD_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Stopping,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What ended the collection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Elapsed,
    Cancelled,
    Quiescent,
    AllKindsLost,
}

/// Cloneable trigger for external cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Stop collecting. The snapshot is still written.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub stop_reason: StopReason,
    pub outcome: WriteOutcome,
    /// Kinds that could not be watched; their objects are missing
    pub lost_kinds: Vec<ResourceKind>,
    /// Records the fan-in folded into the aggregator
    pub records_applied: u64,
    pub duration: Duration,
}

/// Tracks which kinds still have at least one live scope.
#[derive(Debug, Default)]
struct LossTracker {
    live_scopes: HashMap<ResourceKind, usize>,
    lost_kinds: BTreeSet<ResourceKind>,
    failures: Vec<SourceError>,
}

impl LossTracker {
    fn new(plan: &RunPlan) -> Self {
        let mut live_scopes = HashMap::new();
        for scope in &plan.scopes {
            *live_scopes.entry(scope.scope.kind).or_insert(0) += 1;
        }
        Self {
            live_scopes,
            ..Self::default()
        }
    }

    /// Returns true when this loss took out the last scope of its kind.
    fn lose(&mut self, scope: &WatchScope, error: SourceError) -> bool {
        self.failures.push(error);
        let live = self.live_scopes.entry(scope.kind).or_insert(0);
        *live = live.saturating_sub(1);
        *live == 0 && self.lost_kinds.insert(scope.kind)
    }

    fn all_lost(&self) -> bool {
        !self.live_scopes.is_empty() && self.lost_kinds.len() == self.live_scopes.len()
    }
}

pub struct Coordinator {
    run_id: String,
    config: RunConfig,
    source: Arc<dyn ResourceSource>,
    logger: Arc<dyn SyncLogger>,
    cancel: Arc<watch::Sender<bool>>,
    state: watch::Sender<RunState>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        config: RunConfig,
        source: Arc<dyn ResourceSource>,
        logger: Arc<dyn SyncLogger>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config,
            source,
            logger,
            cancel: Arc::new(cancel),
            state,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Follow state transitions, e.g. from another task.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Collect, stop, and write one snapshot.
    pub async fn run(self) -> Result<RunReport> {
        let span = obs::run_span(&self.run_id);
        self.execute().instrument(span).await
    }

    async fn execute(self) -> Result<RunReport> {
        let started = Instant::now();
        self.transition(RunState::Starting);

        let plan = match self.config.validate() {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(e.into(), started)),
        };
        obs::emit_run_started(
            &self.run_id,
            plan.scopes.len(),
            self.config.stop_after.as_millis() as u64,
        );
        self.logger.info(&format!(
            "watching {} kind(s) across {} scope(s) for {:?}",
            plan.kinds.len(),
            plan.scopes.len(),
            self.config.stop_after
        ));

        let aggregator = Arc::new(Aggregator::new());
        let (record_tx, mut record_rx) = mpsc::channel(RECORD_BUFFER);
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (activity_tx, mut activity_rx) = watch::channel(0u64);

        let fan_in = tokio::spawn({
            let aggregator = Arc::clone(&aggregator);
            async move {
                let mut applied = 0u64;
                while let Some(record) = record_rx.recv().await {
                    aggregator.apply(record);
                    applied += 1;
                    activity_tx.send_replace(applied);
                }
                applied
            }
        });

        let mut watchers = JoinSet::new();
        for scope_plan in plan.scopes.iter().cloned() {
            let watcher = ResourceWatcher::new(
                Arc::clone(&self.source),
                scope_plan,
                record_tx.clone(),
                signal_tx.clone(),
                self.cancel.subscribe(),
                Arc::clone(&self.logger),
            );
            watchers.spawn(watcher.run().in_current_span());
        }
        drop(record_tx);
        drop(signal_tx);
        self.transition(RunState::Running);

        let mut losses = LossTracker::new(&plan);
        let mut unsynced: HashSet<WatchScope> =
            plan.scopes.iter().map(|s| s.scope.clone()).collect();
        let mut cancel_rx = self.cancel.subscribe();
        let quiet_period = self.config.quiet_period;
        let mut quiet_armed = false;

        let deadline = tokio::time::sleep(self.config.stop_after);
        let quiet_timer = tokio::time::sleep(quiet_period.unwrap_or_default());
        tokio::pin!(deadline);
        tokio::pin!(quiet_timer);

        let stop_reason = loop {
            if losses.all_lost() {
                break StopReason::AllKindsLost;
            }
            if !quiet_armed && unsynced.is_empty() {
                if let Some(period) = quiet_period {
                    quiet_armed = true;
                    quiet_timer.as_mut().reset(Instant::now() + period);
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => break StopReason::Cancelled,
                _ = &mut deadline => break StopReason::Elapsed,
                Some(joined) = watchers.join_next() => {
                    match self.on_watcher_exit(joined, &mut losses) {
                        Ok(Some(scope)) => {
                            unsynced.remove(&scope);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            watchers.abort_all();
                            return Err(self.fail(e, started));
                        }
                    }
                }
                Some(WatcherSignal::Synced(scope)) = signal_rx.recv() => {
                    unsynced.remove(&scope);
                }
                Ok(()) = activity_rx.changed() => {
                    if let (true, Some(period)) = (quiet_armed, quiet_period) {
                        quiet_timer.as_mut().reset(Instant::now() + period);
                    }
                }
                _ = &mut quiet_timer, if quiet_armed => break StopReason::Quiescent,
            }
        };

        self.logger
            .info(&format!("stopping collection: {stop_reason:?}"));
        self.transition(RunState::Stopping);
        self.cancel.send_replace(true);

        let grace = self.config.grace_period;
        let mut crashed = None;
        let settled = tokio::time::timeout(grace, async {
            while let Some(joined) = watchers.join_next().await {
                if let Err(e) = self.on_watcher_exit(joined, &mut losses) {
                    crashed.get_or_insert(e);
                }
            }
        })
        .await;
        if settled.is_err() {
            self.logger.warn(&format!(
                "{} watcher(s) still running after {grace:?}; aborting",
                watchers.len()
            ));
            watchers.abort_all();
            while watchers.join_next().await.is_some() {}
        }

        let records_applied = match fan_in.await {
            Ok(applied) => applied,
            Err(e) => return Err(self.fail(e.into(), started)),
        };
        if let Some(e) = crashed {
            return Err(self.fail(e, started));
        }

        if losses.all_lost() {
            let failures = std::mem::take(&mut losses.failures);
            return Err(self.fail(SyncError::Authorization { failures }, started));
        }

        let entries = aggregator.drain();
        let writer = SnapshotWriter::from_config(&self.config);
        let written = tokio::task::spawn_blocking(move || writer.write(entries))
            .await
            .map_err(SyncError::from)
            .and_then(|r| r);
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(e, started)),
        };

        obs::emit_snapshot_written(
            &self.run_id,
            outcome.path.as_deref(),
            outcome.entries,
            outcome.kinds,
        );
        match &outcome.path {
            Some(path) => self.logger.info(&format!(
                "wrote {} object(s) to {}",
                outcome.entries,
                path.display()
            )),
            None => self
                .logger
                .info(&format!("wrote {} object(s) to stdout", outcome.entries)),
        }

        self.transition(RunState::Done);
        let duration = started.elapsed();
        obs::emit_run_finished(
            &self.run_id,
            duration.as_millis() as u64,
            records_applied,
            true,
        );
        METRICS.flush();

        Ok(RunReport {
            run_id: self.run_id.clone(),
            state: RunState::Done,
            stop_reason,
            outcome,
            lost_kinds: losses.lost_kinds.into_iter().collect(),
            records_applied,
            duration,
        })
    }

    /// Book-keep a finished watcher task. Returns the scope if it was lost.
    ///
    /// A watcher that panicked leaves its scope unobserved, which fails the run.
    fn on_watcher_exit(
        &self,
        joined: std::result::Result<WatcherExit, tokio::task::JoinError>,
        losses: &mut LossTracker,
    ) -> Result<Option<WatchScope>> {
        match joined {
            Ok(WatcherExit::Cancelled) => Ok(None),
            Ok(WatcherExit::Lost { scope, error }) => {
                obs::emit_watcher_lost(&self.run_id, &scope.to_string(), &error);
                if losses.lose(&scope, error) {
                    self.logger.warn(&format!(
                        "{} will be missing from the snapshot",
                        scope.kind
                    ));
                }
                Ok(Some(scope))
            }
            Err(e) if e.is_cancelled() => Ok(None),
            Err(e) => Err(SyncError::Task(e)),
        }
    }

    fn transition(&self, to: RunState) {
        let from = self.state.send_replace(to);
        if from != to {
            obs::emit_state_changed(&self.run_id, from.as_str(), to.as_str());
        }
    }

    fn fail(&self, error: SyncError, started: Instant) -> SyncError {
        self.cancel.send_replace(true);
        self.transition(RunState::Failed);
        self.logger.error(&error.to_string());
        obs::emit_run_finished(
            &self.run_id,
            started.elapsed().as_millis() as u64,
            0,
            false,
        );
        METRICS.flush();
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use cluster_source::fakes::ScriptedSource;

    #[test]
    fn state_names() {
        assert_eq!(RunState::Stopping.to_string(), "stopping");
        assert!(RunState::Done.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let coordinator = Coordinator::new(
            RunConfig::default(),
            Arc::new(ScriptedSource::new()),
            Arc::new(MemoryLogger::new()),
        );
        let a = coordinator.cancel_handle();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
        assert_eq!(coordinator.state(), RunState::Idle);
    }

    #[test]
    fn loss_tracker_needs_every_scope_of_a_kind() {
        let plan = RunConfig::new()
            .with_resource_kinds(["pod", "node"])
            .with_namespaces(["a", "b"])
            .validate()
            .unwrap();
        let mut losses = LossTracker::new(&plan);
        let denied = |kind| SourceError::Forbidden {
            kind,
            message: "forbidden".to_string(),
        };

        assert!(!losses.lose(&WatchScope::namespaced(ResourceKind::Pod, "a"), denied(ResourceKind::Pod)));
        assert!(losses.lose(&WatchScope::namespaced(ResourceKind::Pod, "b"), denied(ResourceKind::Pod)));
        assert!(!losses.all_lost());
        assert!(losses.lose(&WatchScope::all_namespaces(ResourceKind::Node), denied(ResourceKind::Node)));
        assert!(losses.all_lost());
        assert_eq!(losses.failures.len(), 3);
    }
}
