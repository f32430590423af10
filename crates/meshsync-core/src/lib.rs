//! MeshSync Core Library
//!
//! Bounded-duration snapshot engine: watches a set of resource kinds, folds
//! their events into a last-write-wins map, and writes one snapshot artifact
//! when the collection window closes.

pub mod aggregator;
pub mod coordinator;
pub mod domain;
pub mod logger;
pub mod metrics;
pub mod normalizer;
pub mod obs;
pub mod telemetry;
pub mod watcher;
pub mod writer;

use std::future::Future;
use std::sync::Arc;

pub use aggregator::{Aggregator, Applied};
pub use coordinator::{CancelHandle, Coordinator, RunReport, RunState, StopReason};
pub use domain::{
    ConfigError, NormalizeError, NormalizedRecord, OutputMode, Result, ResourceVersion, RunConfig,
    RunPlan, ScopePlan, SnapshotEntry, SyncError, DEFAULT_GRACE_PERIOD, DEFAULT_STOP_AFTER,
};
pub use logger::{LogLevel, MemoryLogger, SyncLogger, TracingLogger};
pub use metrics::METRICS;
pub use normalizer::normalize;
pub use obs::{
    emit_run_finished, emit_run_started, emit_snapshot_written, emit_state_changed,
    emit_watcher_lost, run_span, RunSpan,
};
pub use telemetry::init_tracing;
pub use watcher::{ResourceWatcher, WatcherExit, WatcherSignal};
pub use writer::{derive_file_name, render, SnapshotWriter, WriteOutcome};

pub use cluster_source::{ResourceKind, ResourceSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect to the cluster named by the ambient kubeconfig or in-cluster
/// service account.
pub async fn connect() -> Result<Arc<dyn ResourceSource>> {
    let source = cluster_source::KubeSource::infer()
        .await
        .map_err(|e| SyncError::Connect(e.to_string()))?;
    Ok(Arc::new(source))
}

/// Run one snapshot against the ambient cluster.
///
/// Configuration is checked before any connection is attempted.
pub async fn run(logger: Arc<dyn SyncLogger>, config: RunConfig) -> Result<RunReport> {
    run_until(logger, config, std::future::pending()).await
}

/// Like [`run`], but `shutdown` completing ends collection early. The
/// snapshot is still written.
pub async fn run_until<F>(
    logger: Arc<dyn SyncLogger>,
    config: RunConfig,
    shutdown: F,
) -> Result<RunReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    let source = connect().await?;
    let coordinator = Coordinator::new(config, source, logger);

    let cancel = coordinator.cancel_handle();
    let trigger = tokio::spawn(async move {
        shutdown.await;
        cancel.cancel();
    });
    let result = coordinator.run().await;
    trigger.abort();
    result
}
