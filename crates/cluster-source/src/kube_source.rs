//! `ResourceSource` backed by a live Kubernetes API server.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use kube::{
    api::{Api, DynamicObject, ListParams, WatchEvent, WatchParams},
    core::TypeMeta,
    Client, Config,
};
use tracing::{debug, instrument, trace};

use crate::error::SourceError;
use crate::kinds::ResourceKind;
use crate::source_traits::{
    ListPage, Operation, RawEvent, ResourceSource, SourceResult, WatchItem, WatchScope,
    WatchSender,
};

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-side watch timeout; must stay below the API server's 295s cap.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Lists and watches resource kinds through a `kube::Client`.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
}

impl std::fmt::Debug for KubeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSource")
            .field("default_namespace", &self.client.default_namespace())
            .finish_non_exhaustive()
    }
}

impl KubeSource {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient configuration (kubeconfig or in-cluster).
    #[instrument]
    pub async fn infer() -> Result<Self, kube::Error> {
        let mut config = Config::infer()
            .await
            .map_err(kube::Error::InferConfig)?;
        // Watches are long-polls; only bound the connect/list calls.
        config.connect_timeout = Some(DEFAULT_API_TIMEOUT);
        config.read_timeout = None;
        let client = Client::try_from(config)?;
        Ok(Self { client })
    }

    fn api(&self, scope: &WatchScope) -> Api<DynamicObject> {
        let ar = scope.kind.api_resource();
        match (&scope.namespace, scope.kind.is_namespaced()) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

/// Turn an object into a raw event payload, restoring `apiVersion`/`kind`
/// which list responses omit on their items.
fn to_raw(operation: Operation, kind: ResourceKind, mut obj: DynamicObject) -> SourceResult<RawEvent> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: kind.api_version(),
            kind: kind.api_kind().to_string(),
        });
    }
    let payload = serde_json::to_value(&obj).map_err(|e| SourceError::Decode {
        kind,
        message: e.to_string(),
    })?;
    Ok(RawEvent::new(operation, kind, payload))
}

#[async_trait]
impl ResourceSource for KubeSource {
    #[instrument(skip_all, fields(scope = %scope))]
    async fn list(&self, scope: &WatchScope) -> SourceResult<ListPage> {
        let kind = scope.kind;
        let list = self
            .api(scope)
            .list(&ListParams::default())
            .await
            .map_err(|e| SourceError::from_kube(kind, e))?;

        let resource_version = list.metadata.resource_version.clone().unwrap_or_default();
        let items = list
            .items
            .into_iter()
            .map(|obj| to_raw(Operation::Added, kind, obj))
            .collect::<SourceResult<Vec<_>>>()?;

        debug!(count = items.len(), resource_version = %resource_version, "listed objects");
        Ok(ListPage {
            resource_version,
            items,
        })
    }

    #[instrument(skip_all, fields(scope = %scope, resource_version = %resource_version))]
    async fn watch(
        &self,
        scope: &WatchScope,
        resource_version: &str,
        tx: WatchSender,
    ) -> SourceResult<()> {
        let kind = scope.kind;
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let api = self.api(scope);
        let stream = api
            .watch(&params, resource_version)
            .await
            .map_err(|e| SourceError::from_kube(kind, e))?;
        let mut stream = Box::pin(stream);

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| SourceError::from_kube(kind, e))?
        {
            let item = match event {
                WatchEvent::Added(obj) => WatchItem::Event(to_raw(Operation::Added, kind, obj)?),
                WatchEvent::Modified(obj) => {
                    WatchItem::Event(to_raw(Operation::Modified, kind, obj)?)
                }
                WatchEvent::Deleted(obj) => {
                    WatchItem::Event(to_raw(Operation::Deleted, kind, obj)?)
                }
                WatchEvent::Bookmark(bookmark) => {
                    WatchItem::Bookmark(bookmark.metadata.resource_version)
                }
                WatchEvent::Error(status) if status.code == 410 => {
                    return Err(SourceError::Expired { kind });
                }
                WatchEvent::Error(status) if status.code == 401 || status.code == 403 => {
                    return Err(SourceError::Forbidden {
                        kind,
                        message: format!("{status:?}"),
                    });
                }
                WatchEvent::Error(status) => {
                    return Err(SourceError::Transient {
                        kind,
                        message: format!("{status:?}"),
                    });
                }
            };

            trace!(?item, "watch item");
            if tx.send(item).await.is_err() {
                // Receiver gone: the watcher was cancelled.
                return Ok(());
            }
        }

        debug!("watch stream closed by server");
        Ok(())
    }
}
