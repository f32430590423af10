//! Source trait definitions for MeshSync
//!
//! A `ResourceSource` exposes the two halves of list-then-watch for one
//! `WatchScope`:
//! - `list`: enumerate existing objects plus the collection resource version
//! - `watch`: stream incremental changes from a resource version onward
//!
//! The trait is backend-agnostic. `KubeSource` talks to a real API server and
//! `fakes::ScriptedSource` replays canned responses for tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::kinds::ResourceKind;

/// Result type for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Change type carried by a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Added => "ADDED",
            Operation::Modified => "MODIFIED",
            Operation::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// A kind-specific object as received from the cluster, tagged with the
/// operation that produced it. Only the normalizer looks inside `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub operation: Operation,
    pub kind: ResourceKind,
    pub payload: serde_json::Value,
}

impl RawEvent {
    pub fn new(operation: Operation, kind: ResourceKind, payload: serde_json::Value) -> Self {
        Self {
            operation,
            kind,
            payload,
        }
    }

    /// Synthetic `Added` event produced by the list phase.
    pub fn added(kind: ResourceKind, payload: serde_json::Value) -> Self {
        Self::new(Operation::Added, kind, payload)
    }
}

/// One (kind, namespace) pair a watcher is responsible for.
///
/// `namespace == None` means every namespace for namespaced kinds, and is the
/// only valid value for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchScope {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
}

impl WatchScope {
    pub fn all_namespaces(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
        }
    }

    pub fn namespaced(kind: ResourceKind, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
        }
    }
}

impl fmt::Display for WatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", self.kind, ns),
            None => write!(f, "{}/*", self.kind),
        }
    }
}

/// Result of the list phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    /// Collection resource version to start watching from
    pub resource_version: String,
    /// Existing objects, each tagged `Added`
    pub items: Vec<RawEvent>,
}

/// Item pushed by `ResourceSource::watch`.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchItem {
    Event(RawEvent),
    /// Progress marker carrying only a resource version
    Bookmark(String),
}

/// Channel a source pushes watch items into.
pub type WatchSender = mpsc::Sender<WatchItem>;

/// List-then-watch feed for resource kinds.
///
/// Guarantees:
/// - `list` returns every object currently visible in the scope.
/// - `watch` delivers changes strictly after `resource_version`, in the order
///   the server produced them.
/// - `watch` returns `Ok(())` when the server ends the stream or the receiver
///   is dropped; the caller decides whether to resume.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Enumerate the objects currently in `scope`.
    async fn list(&self, scope: &WatchScope) -> SourceResult<ListPage>;

    /// Push changes after `resource_version` into `tx` until the stream ends.
    async fn watch(
        &self,
        scope: &WatchScope,
        resource_version: &str,
        tx: WatchSender,
    ) -> SourceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_display() {
        assert_eq!(
            WatchScope::namespaced(ResourceKind::Pod, "default").to_string(),
            "pod/default"
        );
        assert_eq!(
            WatchScope::all_namespaces(ResourceKind::Node).to_string(),
            "node/*"
        );
    }

    #[test]
    fn operation_serializes_uppercase() {
        let v = serde_json::to_value(Operation::Modified).unwrap();
        assert_eq!(v, serde_json::json!("MODIFIED"));
        assert_eq!(Operation::Deleted.to_string(), "DELETED");
    }
}
