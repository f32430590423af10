//! Cluster-Source: list/watch feeds for MeshSync
//!
//! This crate provides the observation layer of the snapshot engine. It knows
//! which resource kinds exist, how to enumerate them, and how to follow their
//! incremental changes.
//!
//! ## Layer 0 - Observation
//!
//! Focus: speaking to the cluster API and nothing else. No ordering,
//! deduplication or persistence happens here.
//!
//! ## Key Components
//!
//! - `ResourceKind`: catalog of supported kinds (group, version, plural, scope)
//! - `ResourceSource`: async list/watch seam consumed by the resource watcher
//! - `KubeSource`: `ResourceSource` over a live `kube::Client`
//! - `fakes::ScriptedSource`: in-memory scripted source for tests

mod error;
pub mod fakes;
pub mod kinds;
mod kube_source;
pub mod source_traits;

pub use error::SourceError;
pub use kinds::{ResourceKind, ResourceScope, UnknownKind};
pub use kube_source::KubeSource;
pub use source_traits::{
    ListPage, Operation, RawEvent, ResourceSource, SourceResult, WatchItem, WatchScope,
    WatchSender,
};
