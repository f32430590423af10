//! Error taxonomy for a snapshot run.
//!
//! Fatal conditions surface as [`SyncError`] from the coordinator. Transient
//! watch failures never leave the watcher, and [`NormalizeError`] is only
//! logged.

use std::path::PathBuf;

use cluster_source::{ResourceKind, SourceError};

/// Invalid or unsatisfiable run configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("unknown output mode: {0} (expected \"file\" or \"stdout\")")]
    UnknownOutputMode(String),

    #[error("invalid namespace name: {0:?}")]
    InvalidNamespace(String),

    #[error("invalid output file name: {0:?}")]
    InvalidFileName(String),
}

/// A raw payload that cannot become a record. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("{kind} payload is not an object")]
    NotAnObject { kind: ResourceKind },

    #[error("{kind} payload has no metadata")]
    MissingMetadata { kind: ResourceKind },

    #[error("{kind} metadata is malformed: {message}")]
    InvalidMetadata { kind: ResourceKind, message: String },

    #[error("{kind} object is missing metadata.{field}")]
    MissingField {
        kind: ResourceKind,
        field: &'static str,
    },

    #[error("expected a {expected} payload, got kind {actual}")]
    KindMismatch {
        expected: ResourceKind,
        actual: String,
    },
}

/// Fatal errors returned by a snapshot run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no requested resource kind could be watched: {}", join_failures(.failures))]
    Authorization { failures: Vec<SourceError> },

    #[error("could not connect to the cluster: {0}")]
    Connect(String),

    #[error("failed to write snapshot {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn join_failures(failures: &[SourceError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for snapshot runs.
pub type Result<T> = std::result::Result<T, SyncError>;
