use crate::cluster::{KubeClusterClient, request_limiter};
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cluster;
mod collector;
mod config;
mod dispatcher;
mod error;
mod image_reference;
mod report;
mod scanner;
mod state;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit status when the report was rendered but some namespaces could not be scanned.
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser)]
#[command(name = "kube-unpinned")]
#[command(about = "Find containers running unpinned images (no tag, or the tag latest)")]
#[command(version)]
struct Cli {
    /// Path to the kubeconfig file (defaults to ~/.kube/config)
    #[arg(long, value_name = "PATH")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current context
    #[arg(long)]
    context: Option<String>,

    /// Scanner settings file (YAML)
    #[arg(long = "config", value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Maximum number of namespaces scanned at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Abort the scan after this many seconds and report what was found
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("Starting kube-unpinned {}", env!("CARGO_PKG_VERSION"));

    let settings = config::load_settings(cli.settings.as_deref())?
        .with_overrides(cli.concurrency, cli.timeout);
    settings.validate()?;
    let filter = settings.namespace_filter()?;

    let kubeconfig = config::resolve_kubeconfig(cli.kubeconfig)?;
    let client = cluster::create_client(&kubeconfig, cli.context.as_deref()).await?;
    let limiter = request_limiter(settings.qps, settings.burst)?;
    let cluster = Arc::new(KubeClusterClient::new(client, settings.page_size, limiter));

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let report = dispatcher::scan_cluster(cluster, &settings, &filter, cancel)
        .await
        .context("Failed to enumerate namespaces")?;

    let mut stdout = io::stdout().lock();
    match cli.output {
        OutputFormat::Table => report::render_table(&report.workloads, &mut stdout)?,
        OutputFormat::Json => report::render_json(&report, &mut stdout)?,
    }

    if report.is_clean() {
        return Ok(ExitCode::SUCCESS);
    }
    report::summarize(&report, &mut io::stderr().lock())?;
    Ok(ExitCode::from(EXIT_PARTIAL))
}

/// Logs go to stderr so that stdout only carries the report.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling scan");
            cancel.cancel();
        }
    });
}
