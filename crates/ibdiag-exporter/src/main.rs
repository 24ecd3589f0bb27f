//! ibdiag-exporter entry point
//!
//! Serves fabric metrics over HTTP, or with `--capture` parses the current
//! net dump once, writes the baseline snapshot and exits.

use anyhow::Context;
use clap::Parser;
use ibdiag_exporter::{
    run_capture, Exporter, ExporterConfig, MetricsServer, MetricsServerConfig, RunMode,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Prometheus exporter for ibdiagnet fabric dumps
#[derive(Parser, Debug)]
#[command(name = "ibdiag-exporter")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "/etc/ibdiag-exporter/config.toml")]
    config: PathBuf,

    /// Metrics port, keeps the configured bind address
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Work dir holding data/ and config/
    #[arg(short = 'w', long)]
    work_dir: Option<PathBuf>,

    /// How dumps are refreshed before a scrape
    #[arg(short = 'm', long, value_enum)]
    mode: Option<RunMode>,

    /// Write the baseline snapshot from the current dump and exit
    #[arg(short = 'g', long)]
    capture: bool,

    /// Name uplinks after the learned leaf switch
    #[arg(short = 'i', long)]
    map_name: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "ibdiag-exporter exiting with error");
            ExitCode::FAILURE
        }
    }
}

/// Structured logging, filtered by `RUST_LOG` or the CLI level
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<ExporterConfig> {
    let mut config = ExporterConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(port) = args.port {
        config.server.set_port(port)?;
    }
    if let Some(work_dir) = &args.work_dir {
        config.dump.work_dir = work_dir.clone();
    }
    if let Some(mode) = args.mode {
        config.dump.mode = mode;
    }
    config.parse.capture_mode |= args.capture;
    config.parse.map_name_mode |= args.map_name;

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    if config.parse.capture_mode {
        info!(
            net_dump = %config.dump.net_dump_path().display(),
            snapshot = %config.dump.snapshot_path().display(),
            "Capturing baseline"
        );
        let records = run_capture(&config).await.context("baseline capture failed")?;
        info!(records, "Baseline captured");
        return Ok(());
    }

    let exporter = Arc::new(Exporter::from_config(&config).context("starting exporter")?);
    let server = MetricsServer::new(
        MetricsServerConfig::new(config.server.socket_addr()?),
        exporter,
    );

    server.start(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal");
    }
}
