//! Domain types shared by every stage of a snapshot run.

pub mod config;
pub mod error;
pub mod record;

pub use config::{
    OutputMode, RunConfig, RunPlan, ScopePlan, DEFAULT_GRACE_PERIOD, DEFAULT_STOP_AFTER,
};
pub use error::{ConfigError, NormalizeError, Result, SyncError};
pub use record::{NormalizedRecord, ResourceVersion, SnapshotEntry};
