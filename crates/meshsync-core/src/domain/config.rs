//! Run configuration.
//!
//! A [`RunConfig`] is assembled once by the caller, validated into a
//! [`RunPlan`] when the run starts, and never mutated afterwards.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cluster_source::{ResourceKind, WatchScope};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Collection window used when the caller does not set one.
pub const DEFAULT_STOP_AFTER: Duration = Duration::from_secs(8);

/// Time watchers get to close after the stop signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Where the finished snapshot goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Atomically written YAML file
    #[default]
    File,
    /// YAML document on standard output
    Stdout,
}

impl FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(OutputMode::File),
            "stdout" => Ok(OutputMode::Stdout),
            _ => Err(ConfigError::UnknownOutputMode(s.to_string())),
        }
    }
}

/// Options for one snapshot run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub output_mode: OutputMode,
    /// Artifact file name; derived from the date when `None`
    pub output_file_name: Option<String>,
    /// Directory derived file names are created in
    pub output_dir: PathBuf,
    pub stop_after: Duration,
    /// Kind names to watch; empty means every supported kind
    pub resource_kinds: Vec<String>,
    /// Namespaces to watch; empty means all namespaces
    pub namespaces: Vec<String>,
    /// Stop early once no record arrived for this long after the initial lists
    pub quiet_period: Option<Duration>,
    pub grace_period: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::File,
            output_file_name: None,
            output_dir: PathBuf::from("."),
            stop_after: DEFAULT_STOP_AFTER,
            resource_kinds: Vec::new(),
            namespaces: Vec::new(),
            quiet_period: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Set the artifact file name. An empty name keeps the derived default.
    pub fn with_output_file_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.output_file_name = if name.trim().is_empty() {
            None
        } else {
            Some(name)
        };
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_stop_after(mut self, duration: Duration) -> Self {
        self.stop_after = duration;
        self
    }

    pub fn with_resource_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_quiet_period(mut self, quiet: Duration) -> Self {
        self.quiet_period = Some(quiet);
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Resolve kind names, check namespaces, and lay out the watch scopes.
    ///
    /// Blank filter entries (e.g. from a trailing comma) are ignored.
    pub fn validate(&self) -> Result<RunPlan, ConfigError> {
        let mut kinds = BTreeSet::new();
        for raw in self.resource_kinds.iter().filter(|k| !k.trim().is_empty()) {
            let kind = raw
                .parse::<ResourceKind>()
                .map_err(|e| ConfigError::UnknownKind(e.0))?;
            kinds.insert(kind);
        }
        if kinds.is_empty() {
            kinds.extend(ResourceKind::ALL);
        }

        let mut namespaces = BTreeSet::new();
        for raw in self.namespaces.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !is_dns_label(raw) {
                return Err(ConfigError::InvalidNamespace(raw.to_string()));
            }
            namespaces.insert(raw.to_string());
        }

        if let Some(name) = &self.output_file_name {
            if name.ends_with('/') || name.ends_with(std::path::MAIN_SEPARATOR) {
                return Err(ConfigError::InvalidFileName(name.clone()));
            }
        }

        let mut scopes = Vec::new();
        for &kind in &kinds {
            if kind.is_namespaced() && !namespaces.is_empty() {
                scopes.extend(namespaces.iter().map(|ns| ScopePlan {
                    scope: WatchScope::namespaced(kind, ns.clone()),
                    retain_names: None,
                }));
            } else {
                let retain_names = (kind == ResourceKind::Namespace && !namespaces.is_empty())
                    .then(|| namespaces.clone());
                scopes.push(ScopePlan {
                    scope: WatchScope::all_namespaces(kind),
                    retain_names,
                });
            }
        }

        Ok(RunPlan {
            kinds,
            namespaces,
            scopes,
        })
    }
}

/// RFC 1123 label: lowercase alphanumerics and '-', at most 63 chars,
/// starting and ending with an alphanumeric.
fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// One watcher's assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePlan {
    pub scope: WatchScope,
    /// When set, only objects with these names are kept
    pub retain_names: Option<BTreeSet<String>>,
}

/// Validated, resolved form of a [`RunConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub kinds: BTreeSet<ResourceKind>,
    pub namespaces: BTreeSet<String>,
    pub scopes: Vec<ScopePlan>,
}
