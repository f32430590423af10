//! In-memory fakes for the source trait (testing only)
//!
//! `ScriptedSource` replays canned list pages and watch sessions per scope,
//! and records every call so tests can assert re-list behaviour. Scopes with
//! no script look like an empty, quiet cluster.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::error::SourceError;
use crate::kinds::ResourceKind;
use crate::source_traits::*;

/// How a scripted watch session ends once its items are delivered.
#[derive(Debug, Clone)]
pub enum WatchEnd {
    /// Keep the stream open until the caller gives up
    Hold,
    /// Server closed the stream cleanly
    Closed,
    /// Stream failed with this error
    Fail(SourceError),
}

/// Items delivered by one `watch` call.
#[derive(Debug, Clone)]
pub struct WatchSession {
    pub items: Vec<WatchItem>,
    pub end: WatchEnd,
}

impl WatchSession {
    pub fn hold(items: Vec<WatchItem>) -> Self {
        Self {
            items,
            end: WatchEnd::Hold,
        }
    }

    pub fn closed(items: Vec<WatchItem>) -> Self {
        Self {
            items,
            end: WatchEnd::Closed,
        }
    }

    pub fn failing(items: Vec<WatchItem>, err: SourceError) -> Self {
        Self {
            items,
            end: WatchEnd::Fail(err),
        }
    }
}

/// A call observed by the scripted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    List(WatchScope),
    Watch(WatchScope, String),
}

#[derive(Debug, Default)]
struct ScopeScript {
    lists: VecDeque<SourceResult<ListPage>>,
    watches: VecDeque<WatchSession>,
    last_page: Option<ListPage>,
}

/// Scripted `ResourceSource` backed by per-scope queues.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<WatchScope, ScopeScript>>,
    calls: Mutex<Vec<SourceCall>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, scope: WatchScope, f: impl FnOnce(&mut ScopeScript)) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        f(scripts.entry(scope).or_default());
    }

    /// Queue a successful list response.
    pub fn with_list(self, scope: WatchScope, page: ListPage) -> Self {
        self.script(scope, |s| s.lists.push_back(Ok(page)));
        self
    }

    /// Queue a failing list response.
    pub fn with_list_error(self, scope: WatchScope, err: SourceError) -> Self {
        self.script(scope, |s| s.lists.push_back(Err(err)));
        self
    }

    /// Queue a watch session.
    pub fn with_watch(self, scope: WatchScope, session: WatchSession) -> Self {
        self.script(scope, |s| s.watches.push_back(session));
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `list` calls made for `scope`.
    pub fn list_calls(&self, scope: &WatchScope) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SourceCall::List(s) if s == scope))
            .count()
    }

    fn record(&self, call: SourceCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ResourceSource for ScriptedSource {
    async fn list(&self, scope: &WatchScope) -> SourceResult<ListPage> {
        self.record(SourceCall::List(scope.clone()));
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let script = scripts.entry(scope.clone()).or_default();
        match script.lists.pop_front() {
            Some(Ok(page)) => {
                script.last_page = Some(page.clone());
                Ok(page)
            }
            Some(Err(e)) => Err(e),
            // Exhausted: the cluster has not changed since the last list.
            None => Ok(script.last_page.clone().unwrap_or(ListPage {
                resource_version: "0".to_string(),
                items: Vec::new(),
            })),
        }
    }

    async fn watch(
        &self,
        scope: &WatchScope,
        resource_version: &str,
        tx: WatchSender,
    ) -> SourceResult<()> {
        self.record(SourceCall::Watch(
            scope.clone(),
            resource_version.to_string(),
        ));
        let session = {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            scripts
                .entry(scope.clone())
                .or_default()
                .watches
                .pop_front()
        };

        let Some(session) = session else {
            std::future::pending::<()>().await;
            return Ok(());
        };

        for item in session.items {
            if tx.send(item).await.is_err() {
                return Ok(());
            }
        }

        match session.end {
            WatchEnd::Hold => {
                std::future::pending::<()>().await;
                Ok(())
            }
            WatchEnd::Closed => Ok(()),
            WatchEnd::Fail(e) => Err(e),
        }
    }
}

/// Minimal object manifest with the metadata every kind carries.
pub fn manifest(
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    uid: &str,
    resource_version: &str,
) -> serde_json::Value {
    let mut metadata = json!({
        "name": name,
        "uid": uid,
        "resourceVersion": resource_version,
    });
    if let Some(ns) = namespace {
        metadata["namespace"] = json!(ns);
    }
    json!({
        "apiVersion": kind.api_version(),
        "kind": kind.api_kind(),
        "metadata": metadata,
        "spec": {},
    })
}

/// Shorthand for a watch event carrying `manifest(..)`.
pub fn event(
    operation: Operation,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    uid: &str,
    resource_version: &str,
) -> WatchItem {
    WatchItem::Event(RawEvent::new(
        operation,
        kind,
        manifest(kind, namespace, name, uid, resource_version),
    ))
}

/// Shorthand for a list page of `(namespace, name, uid, resource_version)` rows.
pub fn page(
    kind: ResourceKind,
    resource_version: &str,
    objects: &[(Option<&str>, &str, &str, &str)],
) -> ListPage {
    ListPage {
        resource_version: resource_version.to_string(),
        items: objects
            .iter()
            .map(|(ns, name, uid, rv)| RawEvent::added(kind, manifest(kind, *ns, name, uid, rv)))
            .collect(),
    }
}
