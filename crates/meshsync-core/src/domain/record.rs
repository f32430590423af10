//! Normalized records and snapshot entries.

use std::cmp::Ordering;
use std::fmt;

use cluster_source::{Operation, ResourceKind};
use serde::{Deserialize, Serialize};

/// Opaque server-assigned version token.
///
/// Tokens are compared in a fixed total order so "older" is well defined
/// for any pair:
/// - all-digit tokens sort before anything else
/// - two all-digit tokens compare numerically (arbitrary length)
/// - everything else compares as plain strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric_digits(&self) -> Option<&str> {
        let s = self.0.as_str();
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let trimmed = s.trim_start_matches('0');
            Some(if trimmed.is_empty() { "0" } else { trimmed })
        } else {
            None
        }
    }
}

impl Ord for ResourceVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ResourceVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Canonical view of one observed object.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub kind: ResourceKind,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
    pub resource_version: ResourceVersion,
    pub operation: Operation,
    /// The object with server-side bookkeeping removed
    pub payload: serde_json::Value,
}

/// One object in the written snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    /// Grouping key in the artifact; not repeated inside the entry
    #[serde(skip)]
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
    #[serde(rename = "resourceVersion")]
    pub resource_version: ResourceVersion,
    pub payload: serde_json::Value,
}

impl From<NormalizedRecord> for SnapshotEntry {
    fn from(r: NormalizedRecord) -> Self {
        Self {
            kind: r.kind,
            namespace: r.namespace,
            name: r.name,
            uid: r.uid,
            resource_version: r.resource_version,
            payload: r.payload,
        }
    }
}
