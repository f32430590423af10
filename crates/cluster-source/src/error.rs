//! Error types for cluster-source

use thiserror::Error;

use crate::kinds::ResourceKind;

/// Errors raised while listing or watching one resource kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The credentials in use may not list or watch this kind
    #[error("not authorized to list/watch {kind}: {message}")]
    Forbidden { kind: ResourceKind, message: String },

    /// The API server does not serve this kind
    #[error("{kind} is not served by the cluster: {message}")]
    Unavailable { kind: ResourceKind, message: String },

    /// The resource version the watch resumed from is too old
    #[error("watch on {kind} expired, a re-list is required")]
    Expired { kind: ResourceKind },

    /// Connection dropped, timeout, or any other recoverable failure
    #[error("transient failure on {kind}: {message}")]
    Transient { kind: ResourceKind, message: String },

    /// An object could not be turned into JSON
    #[error("failed to encode {kind} object: {message}")]
    Decode { kind: ResourceKind, message: String },
}

impl SourceError {
    /// Kind the failure belongs to.
    pub fn kind(&self) -> ResourceKind {
        match self {
            SourceError::Forbidden { kind, .. }
            | SourceError::Unavailable { kind, .. }
            | SourceError::Expired { kind }
            | SourceError::Transient { kind, .. }
            | SourceError::Decode { kind, .. } => *kind,
        }
    }

    /// Whether retrying can never succeed for this kind.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::Forbidden { .. } | SourceError::Unavailable { .. }
        )
    }

    /// Classify a `kube::Error` raised while serving `kind`.
    pub fn from_kube(kind: ResourceKind, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 401 || resp.code == 403 => {
                SourceError::Forbidden {
                    kind,
                    message: err.to_string(),
                }
            }
            kube::Error::Api(ref resp) if resp.code == 404 => SourceError::Unavailable {
                kind,
                message: err.to_string(),
            },
            kube::Error::Api(ref resp) if resp.code == 410 => SourceError::Expired { kind },
            other => SourceError::Transient {
                kind,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// An API error as the server reports it in a `Status` body.
    fn api_error(code: u16, reason: &str) -> kube::Error {
        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": format!("{reason} from apiserver"),
            "reason": reason,
            "code": code,
        });
        kube::Error::Api(serde_json::from_value(status).unwrap())
    }

    #[test]
    fn kube_errors_map_by_status_code() {
        let kind = ResourceKind::Pod;
        for code in [401, 403] {
            let err = SourceError::from_kube(kind, api_error(code, "Forbidden"));
            assert!(
                matches!(err, SourceError::Forbidden { kind: ResourceKind::Pod, .. }),
                "{code} -> {err:?}"
            );
        }
        assert!(matches!(
            SourceError::from_kube(kind, api_error(404, "NotFound")),
            SourceError::Unavailable { kind: ResourceKind::Pod, .. }
        ));
        assert_eq!(
            SourceError::from_kube(kind, api_error(410, "Expired")),
            SourceError::Expired { kind }
        );
        for code in [409, 429, 500, 503] {
            let err = SourceError::from_kube(kind, api_error(code, "InternalError"));
            assert!(!err.is_fatal(), "{code} -> {err:?}");
            assert!(matches!(err, SourceError::Transient { .. }), "{code} -> {err:?}");
        }
    }

    #[test]
    fn fatal_classification() {
        let forbidden = SourceError::Forbidden {
            kind: ResourceKind::Pod,
            message: "pods is forbidden".to_string(),
        };
        assert!(forbidden.is_fatal());

        let unavailable = SourceError::Unavailable {
            kind: ResourceKind::Ingress,
            message: "404".to_string(),
        };
        assert!(unavailable.is_fatal());

        assert!(!SourceError::Expired {
            kind: ResourceKind::Pod
        }
        .is_fatal());
        assert!(!SourceError::Transient {
            kind: ResourceKind::Pod,
            message: "connection reset".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn display_names_the_kind() {
        let err = SourceError::Forbidden {
            kind: ResourceKind::Deployment,
            message: "rbac".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("deployment"));
        assert!(msg.contains("rbac"));
        assert_eq!(err.kind(), ResourceKind::Deployment);
    }
}
