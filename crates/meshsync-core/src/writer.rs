//! Snapshot writer.
//!
//! Renders drained entries as one YAML document keyed by kind and puts it
//! either on stdout or under its final file name via temp file + rename, so
//! an interrupted write never leaves a truncated artifact behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::{OutputMode, Result, RunConfig, SnapshotEntry, SyncError};

/// Prefix of derived artifact names.
pub const FILE_PREFIX: &str = "meshery-cluster-snapshot";

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Final artifact path; `None` in stdout mode
    pub path: Option<PathBuf>,
    pub entries: usize,
    pub kinds: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    mode: OutputMode,
    file_name: Option<String>,
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(mode: OutputMode, file_name: Option<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            file_name,
            dir: dir.into(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.output_mode,
            config.output_file_name.clone(),
            config.output_dir.clone(),
        )
    }

    /// Serialize `entries` and hand them to the configured sink.
    pub fn write(&self, entries: Vec<SnapshotEntry>) -> Result<WriteOutcome> {
        let (document, kinds) = render(entries.iter())?;
        let count = entries.len();

        match self.mode {
            OutputMode::Stdout => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                out.write_all(document.as_bytes())?;
                out.flush()?;
                Ok(WriteOutcome {
                    path: None,
                    entries: count,
                    kinds,
                })
            }
            OutputMode::File => {
                let path = match &self.file_name {
                    Some(name) => {
                        let path = self.dir.join(name);
                        persist_atomic(&path, document.as_bytes())?;
                        path
                    }
                    None => {
                        let today = chrono::Local::now().date_naive();
                        persist_derived(&self.dir, today, document.as_bytes())?
                    }
                };
                Ok(WriteOutcome {
                    path: Some(path),
                    entries: count,
                    kinds,
                })
            }
        }
    }
}

/// Render entries as `kind -> [entry, ...]`.
///
/// Kinds with no entries are left out, so an empty run renders as `{}`.
/// Returns the document and the number of kinds it contains.
pub fn render<'a>(entries: impl Iterator<Item = &'a SnapshotEntry>) -> Result<(String, usize)> {
    let mut grouped: BTreeMap<&str, Vec<&SnapshotEntry>> = BTreeMap::new();
    for entry in entries {
        grouped.entry(entry.kind.name()).or_default().push(entry);
    }
    let kinds = grouped.len();
    Ok((serde_yaml::to_string(&grouped)?, kinds))
}

fn snapshot_name(date: NaiveDate, seq: u32) -> String {
    format!("{FILE_PREFIX}-{}-{seq:02}.yaml", date.format("%Y%m%d"))
}

fn first_free_seq(dir: &Path, date: NaiveDate) -> u32 {
    (0..u32::MAX)
        .find(|seq| !dir.join(snapshot_name(date, *seq)).exists())
        .unwrap_or(u32::MAX)
}

/// First unused `meshery-cluster-snapshot-YYYYMMDD-NN.yaml` in `dir`.
pub fn derive_file_name(dir: &Path, date: NaiveDate) -> String {
    snapshot_name(date, first_free_seq(dir, date))
}

fn write_error(path: &Path, source: io::Error) -> SyncError {
    SyncError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// Temp file in `dir` holding `bytes`, flushed to disk.
fn stage(dir: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Replace `path` with `bytes` in one rename.
fn persist_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = stage(dir, bytes).map_err(|e| write_error(path, e))?;
    tmp.persist(path).map_err(|e| write_error(path, e.error))?;
    Ok(())
}

/// Store `bytes` under the first free derived name in `dir`.
///
/// A name that turns up taken at rename time is skipped, never replaced.
fn persist_derived(dir: &Path, date: NaiveDate, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| write_error(dir, e))?;
    let mut tmp = stage(dir, bytes).map_err(|e| write_error(dir, e))?;

    let mut seq = first_free_seq(dir, date);
    loop {
        let path = dir.join(snapshot_name(date, seq));
        match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists && seq < u32::MAX => {
                debug!(path = %path.display(), "snapshot name taken, trying the next one");
                tmp = e.file;
                seq += 1;
            }
            Err(e) => return Err(write_error(&path, e.error)),
        }
    }
}
