//! MeshSync cluster snapshot - kubectl plugin
//!
//! `kubectl meshery-cluster-snapshot` watches the selected resource kinds for
//! a bounded duration and writes what it saw to a YAML snapshot.

mod duration;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meshsync_core::{OutputMode, RunConfig, RunReport, SyncLogger, TracingLogger};
use tracing::{info, warn, Level};

use crate::duration::parse_duration;

/// Component name attached to engine log lines.
const COMPONENT: &str = "kubectl-meshsync-snapshot";

#[derive(Parser, Debug)]
#[command(name = "kubectl-meshery-cluster-snapshot")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capture a snapshot of cluster resources with MeshSync", long_about = None)]
struct Cli {
    /// Output file name (default: meshery-cluster-snapshot-YYYYMMDD-NN.yaml)
    #[arg(short, long, env = "MESHSYNC_OUTPUT_FILE", default_value = "")]
    file: String,

    /// How long to collect events, e.g. 8s, 500ms, 1m30s
    #[arg(short, long, env = "MESHSYNC_DURATION", default_value = "8s", value_parser = parse_duration)]
    duration: Duration,

    /// Resource kinds to include, comma separated, case-insensitive (default: all)
    #[arg(short, long, env = "MESHSYNC_RESOURCES", value_delimiter = ',')]
    resources: Vec<String>,

    /// Namespaces to include, comma separated (default: all)
    #[arg(short = 'n', long = "namespace", env = "MESHSYNC_NAMESPACES", value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Where to send the snapshot: file or stdout
    #[arg(long, env = "MESHSYNC_OUTPUT_MODE", default_value = "file", value_parser = parse_output_mode)]
    output_mode: OutputMode,

    /// Stop early once no changes arrive for this long after the initial lists
    #[arg(long, env = "MESHSYNC_QUIET_PERIOD", value_parser = parse_duration)]
    quiet_period: Option<Duration>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::new()
            .with_output_mode(self.output_mode)
            .with_output_file_name(self.file.clone())
            .with_stop_after(self.duration)
            .with_resource_kinds(self.resources.iter().cloned())
            .with_namespaces(self.namespaces.iter().cloned());
        if let Some(quiet) = self.quiet_period {
            config = config.with_quiet_period(quiet);
        }
        config
    }
}

fn parse_output_mode(s: &str) -> Result<OutputMode, String> {
    s.parse::<OutputMode>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    meshsync_core::init_tracing(cli.json, level);

    let logger: Arc<dyn SyncLogger> = Arc::new(TracingLogger::new(COMPONENT));
    logger.info("starting meshsync lib...");

    let report = snapshot(&cli, Arc::clone(&logger))
        .await
        .context("error running meshsync lib")?;

    if !report.lost_kinds.is_empty() {
        let lost: Vec<&str> = report.lost_kinds.iter().map(|k| k.name()).collect();
        warn!(kinds = %lost.join(","), "snapshot is missing kinds that could not be watched");
    }
    info!(
        run_id = %report.run_id,
        entries = report.outcome.entries,
        stop = ?report.stop_reason,
        "snapshot complete"
    );
    logger.info("done");
    Ok(())
}

async fn snapshot(cli: &Cli, logger: Arc<dyn SyncLogger>) -> Result<RunReport> {
    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler; run until the duration elapses.
            std::future::pending::<()>().await;
        }
        info!("interrupt received, writing snapshot");
    };
    Ok(meshsync_core::run_until(logger, cli.run_config(), interrupted).await?)
}
