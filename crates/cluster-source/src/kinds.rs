//! Catalog of the resource kinds a snapshot can contain.
//!
//! Every kind carries the coordinates needed to address it on the API server
//! (group, version, plural) and whether it lives inside a namespace. User
//! input is resolved case-insensitively against the singular name, the
//! plural, the CamelCase `Kind`, and the usual kubectl short names.

use std::fmt;
use std::str::FromStr;

use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether objects of a kind are namespaced or cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// Returned when a name does not resolve to a supported kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

/// A supported resource kind.
///
/// Variant order matches `CATALOG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
    Endpoints,
    Ingress,
    ConfigMap,
    ServiceAccount,
    PersistentVolumeClaim,
    PersistentVolume,
    Namespace,
    Node,
    StorageClass,
}

struct KindInfo {
    name: &'static str,
    kind: &'static str,
    group: &'static str,
    version: &'static str,
    plural: &'static str,
    scope: ResourceScope,
    short_names: &'static [&'static str],
}

const fn info(
    name: &'static str,
    kind: &'static str,
    group: &'static str,
    version: &'static str,
    plural: &'static str,
    scope: ResourceScope,
    short_names: &'static [&'static str],
) -> KindInfo {
    KindInfo {
        name,
        kind,
        group,
        version,
        plural,
        scope,
        short_names,
    }
}

use ResourceScope::{Cluster, Namespaced};

const CATALOG: [KindInfo; 17] = [
    info("pod", "Pod", "", "v1", "pods", Namespaced, &["po"]),
    info("deployment", "Deployment", "apps", "v1", "deployments", Namespaced, &["deploy"]),
    info("replicaset", "ReplicaSet", "apps", "v1", "replicasets", Namespaced, &["rs"]),
    info("statefulset", "StatefulSet", "apps", "v1", "statefulsets", Namespaced, &["sts"]),
    info("daemonset", "DaemonSet", "apps", "v1", "daemonsets", Namespaced, &["ds"]),
    info("job", "Job", "batch", "v1", "jobs", Namespaced, &[]),
    info("cronjob", "CronJob", "batch", "v1", "cronjobs", Namespaced, &["cj"]),
    info("service", "Service", "", "v1", "services", Namespaced, &["svc"]),
    info("endpoints", "Endpoints", "", "v1", "endpoints", Namespaced, &["ep"]),
    info("ingress", "Ingress", "networking.k8s.io", "v1", "ingresses", Namespaced, &["ing"]),
    info("configmap", "ConfigMap", "", "v1", "configmaps", Namespaced, &["cm"]),
    info("serviceaccount", "ServiceAccount", "", "v1", "serviceaccounts", Namespaced, &["sa"]),
    info(
        "persistentvolumeclaim",
        "PersistentVolumeClaim",
        "",
        "v1",
        "persistentvolumeclaims",
        Namespaced,
        &["pvc"],
    ),
    info("persistentvolume", "PersistentVolume", "", "v1", "persistentvolumes", Cluster, &["pv"]),
    info("namespace", "Namespace", "", "v1", "namespaces", Cluster, &["ns"]),
    info("node", "Node", "", "v1", "nodes", Cluster, &["no"]),
    info("storageclass", "StorageClass", "storage.k8s.io", "v1", "storageclasses", Cluster, &["sc"]),
];

impl ResourceKind {
    /// Every supported kind, in catalog order.
    pub const ALL: [ResourceKind; 17] = [
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::Service,
        ResourceKind::Endpoints,
        ResourceKind::Ingress,
        ResourceKind::ConfigMap,
        ResourceKind::ServiceAccount,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::PersistentVolume,
        ResourceKind::Namespace,
        ResourceKind::Node,
        ResourceKind::StorageClass,
    ];

    fn info(self) -> &'static KindInfo {
        &CATALOG[self as usize]
    }

    /// Canonical lowercase singular name, used as the artifact key.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// CamelCase `Kind` as served by the API.
    pub fn api_kind(self) -> &'static str {
        self.info().kind
    }

    pub fn scope(self) -> ResourceScope {
        self.info().scope
    }

    pub fn is_namespaced(self) -> bool {
        self.scope() == ResourceScope::Namespaced
    }

    /// `apiVersion` string, e.g. `apps/v1` or `v1`.
    pub fn api_version(self) -> String {
        let info = self.info();
        if info.group.is_empty() {
            info.version.to_string()
        } else {
            format!("{}/{}", info.group, info.version)
        }
    }

    /// Dynamic API resource used to address this kind.
    pub fn api_resource(self) -> ApiResource {
        let info = self.info();
        let gvk = GroupVersionKind::gvk(info.group, info.version, info.kind);
        ApiResource::from_gvk_with_plural(&gvk, info.plural)
    }

    fn matches(self, candidate: &str) -> bool {
        let info = self.info();
        candidate == info.name
            || candidate == info.plural
            || candidate.eq_ignore_ascii_case(info.kind)
            || info.short_names.contains(&candidate)
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let candidate = s.trim().to_ascii_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.matches(&candidate))
            .ok_or_else(|| UnknownKind(s.trim().to_string()))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
