//! Download and plan commands

use crate::catalog::{Endpoints, Period, RetrievalRequest, StabilityPolicy};
use crate::downloader::config::{
    MAX_ATTEMPTS, MAX_BACKOFF_MS, DEFAULT_JITTER_FRACTION, FALLBACK_BASE_URL, INITIAL_BACKOFF_MS,
    MAX_CONCURRENCY, POLITENESS_DELAY_MS, PRIMARY_BASE_URL, SHUTDOWN_GRACE_SECS,
};
use crate::catalog::stability::DEFAULT_PROVISIONAL_MONTHS;
use crate::downloader::{DownloadExecutor, DownloadPlan, PoolConfig, RetryConfig};
use crate::report::{RunOutcome, RunSummary};
use crate::shutdown::SharedShutdown;
use crate::{SpatialResolution, TemporalResolution, Variable};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use super::CliError;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Parse the jitter fraction (0.0 to 1.0)
fn parse_jitter(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("jitter {value} must be between 0.0 and 1.0"));
    }
    Ok(value)
}

/// Which end of a range a date argument bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// Snap to the first day of the given year/month
    Start,
    /// Snap to the last day of the given year/month
    End,
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
///
/// Partial dates cover a whole month or year: a start bound snaps to its first day
/// and an end bound to its last day, so `--start 1971 --end 1971` covers the full year.
pub fn parse_date_bound(input: &str, bound: DateBound) -> Result<NaiveDate, CliError> {
    let input = input.trim();
    let invalid = || {
        CliError::InvalidArgument(format!(
            "Invalid date '{input}': expected YYYY-MM-DD, YYYY-MM or YYYY"
        ))
    };

    let (first_day, span) = match input.len() {
        10 => {
            let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| invalid())?;
            return Ok(date);
        }
        7 => (
            NaiveDate::parse_from_str(&format!("{input}-01"), "%Y-%m-%d").map_err(|_| invalid())?,
            TemporalResolution::Monthly,
        ),
        4 => (
            NaiveDate::parse_from_str(&format!("{input}-01-01"), "%Y-%m-%d")
                .map_err(|_| invalid())?,
            TemporalResolution::Annual,
        ),
        _ => return Err(invalid()),
    };

    match bound {
        DateBound::Start => Ok(first_day),
        DateBound::End => Period::containing(first_day, span)
            .map(|period| period.end)
            .ok_or_else(invalid),
    }
}

/// Parse a comma-separated variable list (`ppt,tmean`)
pub fn parse_variables(input: &str) -> Result<Vec<Variable>, CliError> {
    let variables = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Variable::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map_err(CliError::InvalidArgument)?;

    if variables.is_empty() {
        return Err(CliError::InvalidArgument(
            "at least one variable is required".to_string(),
        ));
    }
    Ok(variables)
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!(
                "Invalid output format: {s}. Valid options: json, human"
            )),
        }
    }
}

/// PRISM bulk downloader CLI
#[derive(Parser, Debug)]
#[command(name = "prism-bulk-downloader")]
#[command(about = "Concurrent, resumable bulk downloader for PRISM climate archives", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Root directory of the local archive tree
    #[arg(long, global = true, default_value = "prism_data")]
    pub output_dir: PathBuf,

    /// Number of concurrent worker lanes (default: 4, max: 32)
    ///
    /// Each lane keeps its own politeness delay, so the request rate against the
    /// upstream service grows with this value. Keep it low for the public endpoints.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Maximum attempts per archive (default: 5, range: 1-20)
    #[arg(long, global = true, default_value_t = MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Backoff before the second attempt, in milliseconds
    #[arg(long, global = true, default_value_t = INITIAL_BACKOFF_MS)]
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff, in milliseconds
    #[arg(long, global = true, default_value_t = MAX_BACKOFF_MS)]
    pub max_delay_ms: u64,

    /// Random jitter applied to each backoff, as a fraction (0.0-1.0)
    #[arg(long, global = true, default_value_t = DEFAULT_JITTER_FRACTION, value_parser = parse_jitter)]
    pub jitter: f64,

    /// Consecutive transient primary failures before switching to the archive tree
    /// (default: half of --max-attempts)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub fallback_after: Option<u32>,

    /// Minimum spacing between requests on one lane, in milliseconds
    #[arg(long, global = true, default_value_t = POLITENESS_DELAY_MS)]
    pub politeness_ms: u64,

    /// Seconds to let in-flight archives finish after Ctrl+C
    #[arg(long, global = true, default_value_t = SHUTDOWN_GRACE_SECS)]
    pub grace_period_secs: u64,

    /// Append diagnostic logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Retry settings from the global options
    pub fn retry_config(&self) -> RetryConfig {
        let mut config = RetryConfig::new(self.max_attempts)
            .with_delays(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_jitter(self.jitter);
        if let Some(fallback_after) = self.fallback_after {
            config = config.with_fallback_after(fallback_after);
        }
        config
    }

    /// Pool settings from the global options
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_concurrency: self.concurrency,
            politeness_delay: Duration::from_millis(self.politeness_ms),
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every archive in a date range
    Download(RequestArgs),

    /// Show what a download would fetch without fetching anything
    Plan(RequestArgs),

    /// List the published variables
    Variables(super::VariablesCommand),
}

/// Arguments describing a retrieval request
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Temporal resolution (daily, monthly, annual)
    #[arg(long)]
    pub resolution: TemporalResolution,

    /// First date (YYYY-MM-DD, YYYY-MM or YYYY)
    #[arg(long)]
    pub start: String,

    /// Last date, inclusive (YYYY-MM-DD, YYYY-MM or YYYY)
    #[arg(long)]
    pub end: String,

    /// Comma-separated variables (e.g. ppt,tmean)
    #[arg(long, required_unless_present = "all_variables", conflicts_with = "all_variables")]
    pub variables: Option<String>,

    /// Every variable published at the requested resolution
    #[arg(long, default_value_t = false)]
    pub all_variables: bool,

    /// Spatial resolution (4km or 800m)
    #[arg(long, default_value = "4km")]
    pub spatial: SpatialResolution,

    /// Store archives directly under <output-dir>/<variable>/
    #[arg(long, default_value_t = false)]
    pub flat: bool,

    /// Months after a period ends during which it is provisional
    #[arg(long, default_value_t = DEFAULT_PROVISIONAL_MONTHS)]
    pub provisional_months: u32,

    /// Days after a period ends during which it is early (off by default)
    #[arg(long)]
    pub early_window_days: Option<u32>,

    /// Re-hash existing archives against the manifest before skipping them
    #[arg(long, default_value_t = false)]
    pub verify_checksums: bool,

    /// Commit downloads without checking they are readable ZIP archives
    #[arg(long, default_value_t = false)]
    pub no_verify_archive: bool,

    /// Retry on the archive tree when the web service reports not found
    #[arg(long, default_value_t = false)]
    pub fallback_on_not_found: bool,

    /// Unpack archives next to the .zip after downloading
    #[arg(long, default_value_t = false)]
    pub extract: bool,

    /// Web service base URL
    #[arg(long, default_value = PRIMARY_BASE_URL)]
    pub primary_base_url: String,

    /// Archive tree base URL
    #[arg(long, default_value = FALLBACK_BASE_URL)]
    pub fallback_base_url: String,
}

impl RequestArgs {
    /// Build the retrieval request
    pub fn to_request(&self, cli: &Cli) -> Result<RetrievalRequest, CliError> {
        let start = parse_date_bound(&self.start, DateBound::Start)?;
        let end = parse_date_bound(&self.end, DateBound::End)?;
        let variables = if self.all_variables {
            Variable::available_for(self.resolution)
        } else {
            parse_variables(self.variables.as_deref().unwrap_or_default())?
        };

        Ok(
            RetrievalRequest::new(start, end, variables, self.resolution, cli.output_dir.clone())
                .with_concurrency(cli.concurrency)
                .with_spatial_resolution(self.spatial)
                .with_nesting(!self.flat)
                .with_stability_policy(StabilityPolicy {
                    provisional_months: self.provisional_months,
                    early_window_days: self.early_window_days,
                })
                .with_endpoints(Endpoints {
                    primary_base: self.primary_base_url.trim_end_matches('/').to_string(),
                    fallback_base: self.fallback_base_url.trim_end_matches('/').to_string(),
                }),
        )
    }

    fn executor(&self, cli: &Cli) -> DownloadExecutor {
        DownloadExecutor::new()
            .with_retry_config(
                cli.retry_config()
                    .with_fallback_on_not_found(self.fallback_on_not_found),
            )
            .with_pool_config(cli.pool_config())
            .with_checksum_verification(self.verify_checksums)
            .with_archive_verification(!self.no_verify_archive)
            .with_extraction(self.extract)
    }

    /// Run the download; target failures are reported through the returned outcome
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunOutcome, CliError> {
        let request = self.to_request(cli)?;
        info!(
            resolution = %request.temporal_resolution,
            start = %request.date_start,
            end = %request.date_end,
            variables = request.variables.len(),
            output = %request.output_root.display(),
            "Starting download"
        );

        let mut executor = self.executor(cli).with_shutdown(shutdown);
        if cli.output_format == OutputFormat::Human {
            executor = executor.with_progress(create_progress_bar());
        }

        match executor.execute(request).await {
            Ok(summary) => {
                output_summary(cli.output_format, &summary);
                Ok(summary.outcome)
            }
            Err(err) => match err.summary() {
                Some(summary) => {
                    error!(error = %err, "Download stopped early");
                    output_summary(cli.output_format, summary);
                    Ok(RunOutcome::HardFailure)
                }
                None => Err(CliError::from(err)),
            },
        }
    }

    /// Print the plan for this request
    pub async fn plan(&self, cli: &Cli) -> Result<(), CliError> {
        let request = self.to_request(cli)?;
        let plan = self.executor(cli).plan(&request).await?;
        output_plan(cli.output_format, &plan)
    }
}

/// Progress bar for the pool; length is set once the resume filter has run
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|e| {
            warn!(error = %e, "Invalid progress template; using default style");
            ProgressStyle::default_bar()
        });
    pb.set_style(style);
    pb.set_message("archives");
    pb
}

fn output_summary(format: OutputFormat, summary: &RunSummary) {
    match format {
        OutputFormat::Json => match serde_json::to_string(summary) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "Failed to serialize run summary"),
        },
        OutputFormat::Human => {
            let rendered = summary.render_human();
            if summary.outcome == RunOutcome::Success {
                println!("{rendered}");
            } else {
                eprintln!("{rendered}");
            }
        }
    }
}

fn output_plan(format: OutputFormat, plan: &DownloadPlan) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string(plan)
                .map_err(|e| CliError::InvalidArgument(format!("Failed to serialize plan: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Human => {
            for target in &plan.targets {
                println!(
                    "{:>6}  {:<28} {:<12} {}",
                    target.ordinal,
                    target.label(),
                    target.stability.as_str(),
                    target.local_path.display()
                );
            }
            println!(
                "\n{} targets: {} to download, {} already present",
                plan.targets.len(),
                plan.pending,
                plan.skipped
            );
        }
    }
    Ok(())
}
