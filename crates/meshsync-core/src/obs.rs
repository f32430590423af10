//! Structured lifecycle events for snapshot runs.
//!
//! All events carry an `event` field (`run.started`, `run.state_changed`,
//! `watcher.lost`, `snapshot.written`, `run.finished`) and are emitted inside
//! the run span from [`run_span`].

use std::path::Path;

use tracing::{info, warn};

/// Span every event of one run is recorded under.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("meshsync.run", run_id = %run_id)
}

/// RAII guard that enters [`run_span`] for synchronous code.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

pub fn emit_run_started(run_id: &str, scopes: usize, stop_after_ms: u64) {
    info!(
        event = "run.started",
        run_id = %run_id,
        scopes = scopes,
        stop_after_ms = stop_after_ms,
    );
}

pub fn emit_state_changed(run_id: &str, from: &str, to: &str) {
    info!(event = "run.state_changed", run_id = %run_id, from = %from, to = %to);
}

/// A scope stopped permanently (warn level).
pub fn emit_watcher_lost(run_id: &str, scope: &str, error: &dyn std::fmt::Display) {
    warn!(event = "watcher.lost", run_id = %run_id, scope = %scope, error = %error);
}

pub fn emit_snapshot_written(run_id: &str, path: Option<&Path>, entries: usize, kinds: usize) {
    let path = path.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string());
    info!(
        event = "snapshot.written",
        run_id = %run_id,
        path = %path,
        entries = entries,
        kinds = kinds,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, records_applied: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        records_applied = records_applied,
        success = success,
    );
}
