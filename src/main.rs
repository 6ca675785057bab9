//! Main entry point for the prism-bulk-downloader CLI

use anyhow::Context;
use clap::Parser;
use prism_bulk_downloader::cli::{Cli, Commands};
use prism_bulk_downloader::metrics;
use prism_bulk_downloader::report::RunOutcome;
use prism_bulk_downloader::shutdown::ShutdownCoordinator;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting and file output
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prism_bulk_downloader=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // stdout is reserved for command output (summaries, plans, --output-format json)
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            if json_format {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if json_format {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<RunOutcome> {
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr).await?;
    }

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing in-flight archives...");
                shutdown.request_shutdown();
            }
        }
    });

    let outcome = match &cli.command {
        Commands::Download(args) => args.execute(cli, shutdown).await?,
        Commands::Plan(args) => {
            args.plan(cli).await?;
            RunOutcome::Success
        }
        Commands::Variables(cmd) => {
            cmd.execute(cli.output_format)?;
            RunOutcome::Success
        }
    };
    Ok(outcome)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    match run(&cli).await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
