//! Observability tests for snapshot run lifecycle tracing.

use std::sync::Arc;
use std::time::Duration;

use cluster_source::fakes::{page, ScriptedSource};
use cluster_source::{ResourceKind, WatchScope};
use meshsync_core::{
    emit_run_finished, emit_run_started, emit_snapshot_written, emit_state_changed,
    emit_watcher_lost, Coordinator, RunConfig, RunSpan, SyncLogger, TracingLogger,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn run_started_logs_scope_count() {
    emit_run_started("run-123", 4, 8000);
    assert!(logs_contain("run.started"));
    assert!(logs_contain("scopes=4"));
}

#[traced_test]
#[test]
fn state_change_logs_both_states() {
    emit_state_changed("run-456", "running", "stopping");
    assert!(logs_contain("run.state_changed"));
    assert!(logs_contain("stopping"));
}

#[traced_test]
#[test]
fn watcher_lost_is_a_warning() {
    emit_watcher_lost("run-789", "node/*", &"nodes is forbidden");
    assert!(logs_contain("WARN"));
    assert!(logs_contain("watcher.lost"));
}

#[traced_test]
#[test]
fn snapshot_written_without_path_logs_dash() {
    emit_snapshot_written("run-out", None, 3, 2);
    assert!(logs_contain("snapshot.written"));
    assert!(logs_contain("entries=3"));
}

#[traced_test]
#[test]
fn run_finished_logs_outcome() {
    emit_run_finished("run-done", 2000, 42, true);
    assert!(logs_contain("records_applied=42"));
    assert!(logs_contain("success=true"));
}

#[traced_test]
#[test]
fn run_span_tags_events() {
    let _span = RunSpan::enter("span-run-1");
    tracing::info!("inside run");
    assert!(logs_contain("span-run-1"));
}

#[traced_test]
#[test]
fn tracing_logger_forwards_component() {
    let logger = TracingLogger::new("kubectl-meshsync-snapshot");
    logger.warn("dropping event");
    assert!(logs_contain("kubectl-meshsync-snapshot"));
    assert!(logs_contain("dropping event"));
}

#[traced_test]
#[tokio::test]
async fn coordinator_emits_lifecycle_events() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource::new().with_list(
        WatchScope::all_namespaces(ResourceKind::Node),
        page(ResourceKind::Node, "1", &[(None, "node-a", "u-n", "1")]),
    ));
    let config = RunConfig::new()
        .with_output_dir(dir.path())
        .with_output_file_name("trace.yaml")
        .with_resource_kinds(["node"])
        .with_stop_after(Duration::from_millis(50));

    let coordinator = Coordinator::new(config, source, Arc::new(TracingLogger::new("test")));
    let run_id = coordinator.run_id().to_string();
    coordinator.run().await.unwrap();

    assert!(logs_contain("run.started"));
    assert!(logs_contain("snapshot.written"));
    assert!(logs_contain("run.finished"));
    assert!(logs_contain(&run_id));
    assert!(logs_contain("metric=\"flush\""));
}
