//! Resource watcher: list-then-watch for one scope.
//!
//! A watcher owns its cursor (last resource version) and the set of objects
//! it has reported, and pushes normalized records into the fan-in channel
//! until the shared cancel flag flips. Connection loss and expiry are
//! absorbed here; only a permanent denial ends the watcher early.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use cluster_source::{
    ListPage, Operation, RawEvent, ResourceSource, SourceError, SourceResult, WatchItem,
    WatchScope,
};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument};

use crate::domain::{NormalizedRecord, ResourceVersion, ScopePlan};
use crate::logger::SyncLogger;
use crate::metrics::METRICS;
use crate::normalizer::normalize;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Items buffered between a source and its watcher.
const WATCH_BUFFER: usize = 64;

/// Progress reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherSignal {
    /// The first list for this scope has been forwarded
    Synced(WatchScope),
}

/// Why a watcher stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherExit {
    Cancelled,
    /// Listing or watching the scope was permanently denied
    Lost {
        scope: WatchScope,
        error: SourceError,
    },
}

enum WatchOutcome {
    Cancelled,
    /// Server ended the stream normally
    Closed,
    Failed(SourceError),
}

#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

#[derive(Debug, Clone)]
struct KnownObject {
    namespace: Option<String>,
    name: String,
}

/// Resolve once the cancel flag is set or its sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|c| *c).await;
}

pub struct ResourceWatcher {
    source: Arc<dyn ResourceSource>,
    plan: ScopePlan,
    sink: mpsc::Sender<NormalizedRecord>,
    signals: mpsc::UnboundedSender<WatcherSignal>,
    cancel: watch::Receiver<bool>,
    logger: Arc<dyn SyncLogger>,
    known: HashMap<String, KnownObject>,
    resource_version: String,
    backoff: Backoff,
}

impl ResourceWatcher {
    pub fn new(
        source: Arc<dyn ResourceSource>,
        plan: ScopePlan,
        sink: mpsc::Sender<NormalizedRecord>,
        signals: mpsc::UnboundedSender<WatcherSignal>,
        cancel: watch::Receiver<bool>,
        logger: Arc<dyn SyncLogger>,
    ) -> Self {
        Self {
            source,
            plan,
            sink,
            signals,
            cancel,
            logger,
            known: HashMap::new(),
            resource_version: String::new(),
            backoff: Backoff::new(),
        }
    }

    /// Drive the scope until cancelled or permanently denied.
    #[instrument(skip_all, fields(scope = %self.plan.scope))]
    pub async fn run(mut self) -> WatcherExit {
        let mut listed = false;
        loop {
            let page = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return WatcherExit::Cancelled,
                page = self.source.list(&self.plan.scope) => page,
            };

            match page {
                Ok(page) => {
                    if listed {
                        METRICS.inc_relists();
                        self.logger
                            .info(&format!("re-listed {}", self.plan.scope));
                    }
                    self.backoff.reset();
                    if !self.reconcile(page).await {
                        return WatcherExit::Cancelled;
                    }
                    if !listed {
                        let _ = self
                            .signals
                            .send(WatcherSignal::Synced(self.plan.scope.clone()));
                        listed = true;
                    }
                }
                Err(error) if error.is_fatal() => return self.lost(error),
                Err(error) => {
                    self.logger
                        .warn(&format!("list {} failed: {error}", self.plan.scope));
                    if !self.pause().await {
                        return WatcherExit::Cancelled;
                    }
                    continue;
                }
            }

            loop {
                match self.watch_once().await {
                    WatchOutcome::Cancelled => return WatcherExit::Cancelled,
                    WatchOutcome::Closed => {
                        METRICS.inc_watch_restarts();
                        debug!(resource_version = %self.resource_version, "watch closed, resuming");
                    }
                    WatchOutcome::Failed(error) if error.is_fatal() => return self.lost(error),
                    WatchOutcome::Failed(SourceError::Expired { .. }) => {
                        debug!("resource version expired, re-listing");
                        break;
                    }
                    WatchOutcome::Failed(error) => {
                        self.logger
                            .warn(&format!("watch {} interrupted: {error}", self.plan.scope));
                        if !self.pause().await {
                            return WatcherExit::Cancelled;
                        }
                        break;
                    }
                }
            }
        }
    }

    fn lost(&self, error: SourceError) -> WatcherExit {
        self.logger
            .error(&format!("giving up on {}: {error}", self.plan.scope));
        WatcherExit::Lost {
            scope: self.plan.scope.clone(),
            error,
        }
    }

    /// Forward a list page, then delete whatever we reported earlier that the
    /// page no longer contains.
    async fn reconcile(&mut self, page: ListPage) -> bool {
        let ListPage {
            resource_version,
            items,
        } = page;

        let mut seen = HashSet::new();
        for raw in items {
            if let Some(record) = self.normalize(raw) {
                seen.insert(record.uid.clone());
                if !self.forward(record).await {
                    return false;
                }
            }
        }

        let gone: Vec<(String, KnownObject)> = self
            .known
            .iter()
            .filter(|(uid, _)| !seen.contains(*uid))
            .map(|(uid, obj)| (uid.clone(), obj.clone()))
            .collect();
        for (uid, obj) in gone {
            let record = self.tombstone(uid, obj, &resource_version);
            if !self.forward(record).await {
                return false;
            }
        }

        self.resource_version = resource_version;
        true
    }

    fn tombstone(&self, uid: String, obj: KnownObject, resource_version: &str) -> NormalizedRecord {
        let kind = self.plan.scope.kind;
        let mut metadata = json!({ "name": obj.name, "uid": uid });
        if let Some(ns) = &obj.namespace {
            metadata["namespace"] = json!(ns);
        }
        NormalizedRecord {
            kind,
            namespace: obj.namespace,
            name: obj.name,
            uid,
            resource_version: ResourceVersion::new(resource_version),
            operation: Operation::Deleted,
            payload: json!({
                "apiVersion": kind.api_version(),
                "kind": kind.api_kind(),
                "metadata": metadata,
            }),
        }
    }

    async fn watch_once(&mut self) -> WatchOutcome {
        let (tx, mut rx) = mpsc::channel(WATCH_BUFFER);
        let source = Arc::clone(&self.source);
        let scope = self.plan.scope.clone();
        let from = self.resource_version.clone();
        let stream = async move { source.watch(&scope, &from, tx).await };
        tokio::pin!(stream);

        let mut finished: Option<SourceResult<()>> = None;
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return WatchOutcome::Cancelled,
                item = rx.recv() => match item {
                    Some(item) => {
                        if !self.handle(item).await {
                            return WatchOutcome::Cancelled;
                        }
                    }
                    None => break,
                },
                result = &mut stream, if finished.is_none() => finished = Some(result),
            }
        }

        let result = match finished {
            Some(result) => result,
            None => stream.await,
        };
        match result {
            Ok(()) => WatchOutcome::Closed,
            Err(error) => WatchOutcome::Failed(error),
        }
    }

    async fn handle(&mut self, item: WatchItem) -> bool {
        match item {
            WatchItem::Bookmark(rv) => {
                self.resource_version = rv;
                true
            }
            WatchItem::Event(raw) => match self.normalize(raw) {
                Some(record) => {
                    self.resource_version = record.resource_version.to_string();
                    self.forward(record).await
                }
                None => true,
            },
        }
    }

    fn normalize(&self, raw: RawEvent) -> Option<NormalizedRecord> {
        METRICS.inc_events_received();
        match normalize(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                METRICS.inc_records_dropped();
                self.logger
                    .warn(&format!("dropping event from {}: {e}", self.plan.scope));
                None
            }
        }
    }

    /// Send a record to the fan-in. Returns false once the run is stopping.
    async fn forward(&mut self, record: NormalizedRecord) -> bool {
        if let Some(names) = &self.plan.retain_names {
            if !names.contains(&record.name) {
                return true;
            }
        }

        match record.operation {
            Operation::Deleted => {
                self.known.remove(&record.uid);
            }
            Operation::Added | Operation::Modified => {
                self.known.insert(
                    record.uid.clone(),
                    KnownObject {
                        namespace: record.namespace.clone(),
                        name: record.name.clone(),
                    },
                );
            }
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => false,
            sent = self.sink.send(record) => sent.is_ok(),
        }
    }

    async fn pause(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogLevel, MemoryLogger};
    use assert_matches::assert_matches;
    use cluster_source::fakes::{event, page, ScriptedSource, SourceCall, WatchSession};
    use cluster_source::ResourceKind;
    use std::collections::BTreeSet;
    use tokio::task::JoinHandle;

    struct Harness {
        records: mpsc::Receiver<NormalizedRecord>,
        signals: mpsc::UnboundedReceiver<WatcherSignal>,
        cancel: watch::Sender<bool>,
        handle: JoinHandle<WatcherExit>,
        logger: Arc<MemoryLogger>,
    }

    impl Harness {
        async fn next(&mut self) -> NormalizedRecord {
            self.records.recv().await.expect("watcher closed its sink")
        }

        async fn stop(self) -> WatcherExit {
            self.cancel.send_replace(true);
            self.handle.await.unwrap()
        }
    }

    fn spawn(source: Arc<ScriptedSource>, plan: ScopePlan) -> Harness {
        let (tx, records) = mpsc::channel(16);
        let (sig_tx, signals) = mpsc::unbounded_channel();
        let (cancel, cancel_rx) = watch::channel(false);
        let logger = Arc::new(MemoryLogger::new());
        let watcher = ResourceWatcher::new(source, plan, tx, sig_tx, cancel_rx, logger.clone());
        Harness {
            records,
            signals,
            cancel,
            handle: tokio::spawn(watcher.run()),
            logger,
        }
    }

    fn plan(scope: &WatchScope) -> ScopePlan {
        ScopePlan {
            scope: scope.clone(),
            retain_names: None,
        }
    }

    fn pods() -> WatchScope {
        WatchScope::namespaced(ResourceKind::Pod, "default")
    }

    #[tokio::test]
    async fn lists_then_watches() {
        let scope = pods();
        let source = Arc::new(
            ScriptedSource::new()
                .with_list(
                    scope.clone(),
                    page(ResourceKind::Pod, "10", &[(Some("default"), "a", "u-a", "9")]),
                )
                .with_watch(
                    scope.clone(),
                    WatchSession::hold(vec![event(
                        Operation::Modified,
                        ResourceKind::Pod,
                        Some("default"),
                        "a",
                        "u-a",
                        "11",
                    )]),
                ),
        );
        let mut h = spawn(source.clone(), plan(&scope));

        let first = h.next().await;
        assert_eq!(first.operation, Operation::Added);
        assert_eq!(h.signals.recv().await, Some(WatcherSignal::Synced(scope.clone())));
        let second = h.next().await;
        assert_eq!(second.operation, Operation::Modified);
        assert_eq!(second.resource_version.as_str(), "11");

        assert_eq!(h.stop().await, WatcherExit::Cancelled);
        assert_eq!(
            source.calls(),
            vec![
                SourceCall::List(scope.clone()),
                SourceCall::Watch(scope, "10".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn closed_watch_resumes_from_last_version() {
        let scope = pods();
        let source = Arc::new(
            ScriptedSource::new()
                .with_list(scope.clone(), page(ResourceKind::Pod, "10", &[]))
                .with_watch(
                    scope.clone(),
                    WatchSession::closed(vec![
                        event(Operation::Added, ResourceKind::Pod, Some("default"), "b", "u-b", "12"),
                        WatchItem::Bookmark("15".to_string()),
                    ]),
                ),
        );
        let mut h = spawn(source.clone(), plan(&scope));
        assert_eq!(h.next().await.uid, "u-b");

        // Second watch call is unscripted and holds; give it a moment to start.
        while !source
            .calls()
            .contains(&SourceCall::Watch(scope.clone(), "15".to_string()))
        {
            tokio::task::yield_now().await;
        }
        assert_eq!(source.list_calls(&scope), 1);
        h.stop().await;
    }

    #[tokio::test]
    async fn expired_watch_relists_and_deletes_missing_objects() {
        let scope = pods();
        let source = Arc::new(
            ScriptedSource::new()
                .with_list(
                    scope.clone(),
                    page(
                        ResourceKind::Pod,
                        "10",
                        &[
                            (Some("default"), "a", "u-a", "9"),
                            (Some("default"), "b", "u-b", "8"),
                        ],
                    ),
                )
                .with_watch(
                    scope.clone(),
                    WatchSession::failing(
                        vec![],
                        SourceError::Expired {
                            kind: ResourceKind::Pod,
                        },
                    ),
                )
                .with_list(
                    scope.clone(),
                    page(ResourceKind::Pod, "20", &[(Some("default"), "a", "u-a", "19")]),
                ),
        );
        let mut h = spawn(source.clone(), plan(&scope));

        let mut seen = Vec::new();
        for _ in 0..4 {
            let r = h.next().await;
            seen.push((r.operation, r.uid, r.resource_version.to_string()));
        }
        assert!(seen.contains(&(Operation::Added, "u-a".to_string(), "19".to_string())));
        assert_eq!(
            seen.last(),
            Some(&(Operation::Deleted, "u-b".to_string(), "20".to_string()))
        );
        assert_eq!(source.list_calls(&scope), 2);
        h.stop().await;
    }

    #[tokio::test]
    async fn forbidden_list_loses_scope() {
        let scope = WatchScope::all_namespaces(ResourceKind::Node);
        let denied = SourceError::Forbidden {
            kind: ResourceKind::Node,
            message: "nodes is forbidden".to_string(),
        };
        let source = Arc::new(ScriptedSource::new().with_list_error(scope.clone(), denied.clone()));
        let h = spawn(source, plan(&scope));

        let exit = h.handle.await.unwrap();
        assert_eq!(
            exit,
            WatcherExit::Lost {
                scope,
                error: denied
            }
        );
        assert!(h.logger.contains(LogLevel::Error, "nodes is forbidden"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_backs_off_then_relists() {
        let scope = pods();
        let source = Arc::new(
            ScriptedSource::new()
                .with_list_error(
                    scope.clone(),
                    SourceError::Transient {
                        kind: ResourceKind::Pod,
                        message: "connection reset".to_string(),
                    },
                )
                .with_list(
                    scope.clone(),
                    page(ResourceKind::Pod, "3", &[(Some("default"), "a", "u-a", "3")]),
                ),
        );
        let mut h = spawn(source.clone(), plan(&scope));

        let record = h.next().await;
        assert_eq!(record.uid, "u-a");
        assert_eq!(source.list_calls(&scope), 2);
        assert!(h.logger.contains(LogLevel::Warn, "connection reset"));
        h.stop().await;
    }

    #[tokio::test]
    async fn malformed_events_are_dropped() {
        let scope = pods();
        let source = Arc::new(
            ScriptedSource::new()
                .with_list(scope.clone(), page(ResourceKind::Pod, "1", &[]))
                .with_watch(
                    scope.clone(),
                    WatchSession::hold(vec![
                        WatchItem::Event(RawEvent::added(ResourceKind::Pod, json!({"spec": {}}))),
                        event(Operation::Added, ResourceKind::Pod, Some("default"), "ok", "u-ok", "2"),
                    ]),
                ),
        );
        let mut h = spawn(source, plan(&scope));
        assert_eq!(h.next().await.uid, "u-ok");
        assert!(h.logger.contains(LogLevel::Warn, "no metadata"));
        h.stop().await;
    }

    #[tokio::test]
    async fn retain_names_filters_namespace_objects() {
        let scope = WatchScope::all_namespaces(ResourceKind::Namespace);
        let source = Arc::new(ScriptedSource::new().with_list(
            scope.clone(),
            page(
                ResourceKind::Namespace,
                "5",
                &[(None, "default", "u-d", "1"), (None, "kube-system", "u-k", "2")],
            ),
        ));
        let mut h = spawn(
            source,
            ScopePlan {
                scope,
                retain_names: Some(BTreeSet::from(["kube-system".to_string()])),
            },
        );
        assert_eq!(h.next().await.name, "kube-system");
        h.signals.recv().await;
        assert_matches!(h.records.try_recv(), Err(_));
        h.stop().await;
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay(), Duration::from_millis(250));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), MAX_BACKOFF);
        b.reset();
        assert_eq!(b.next_delay(), INITIAL_BACKOFF);
    }
}
