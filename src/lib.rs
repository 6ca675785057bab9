//! # PRISM Bulk Downloader Library
//!
//! A concurrent, resumable downloader for PRISM gridded climate archives
//! (4km / 800m BIL bundles served as `.zip` files). Designed for building local
//! climate data stores over an unreliable, rate-sensitive upstream service.
//!
//! ## Features
//!
//! - **Target Catalog**: Expands a date range × variable set × resolution request into
//!   an ordered, deterministic list of retrieval targets
//! - **Resume Capability**: Files already present (and matching the download manifest)
//!   are skipped, so re-running a request only fetches what is missing
//! - **Retry with Backoff**: Capped exponential backoff with jitter, switching from the
//!   web service to the archive tree after repeated transient failures
//! - **Bounded Concurrency**: A fixed number of worker lanes with per-lane politeness delay
//! - **Atomic Commits**: Downloads stream into temp files and are renamed into place only
//!   after every check passes
//! - **Structured Reporting**: Per-attempt JSON-lines log and a stable run summary
//!
//! ## Quick Start
//!
//! ```no_run
//! use prism_bulk_downloader::catalog::RetrievalRequest;
//! use prism_bulk_downloader::downloader::DownloadExecutor;
//! use prism_bulk_downloader::{TemporalResolution, Variable};
//! use chrono::NaiveDate;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = RetrievalRequest::new(
//!     NaiveDate::from_ymd_opt(1971, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(1971, 12, 31).unwrap(),
//!     vec![Variable::Ppt, Variable::Tmean],
//!     TemporalResolution::Monthly,
//!     "./prism_data",
//! );
//!
//! let executor = DownloadExecutor::new();
//! let summary = executor.execute(request).await?;
//! println!("{} succeeded, {} failed", summary.counts.succeeded, summary.counts.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] - Request validation and target generation (pure, no I/O)
//! - [`resume`] - Resume filter, download manifest and run lock
//! - [`fetcher`] - Transports and the single-attempt fetch executor
//! - [`downloader`] - Retry policy, worker pool and run orchestration
//! - [`report`] - Outcome aggregation, attempt log and run summary
//! - [`output`] - Local path layout and archive extraction

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Target catalog generation
pub mod catalog;

/// Download orchestration
pub mod downloader;

/// Transports and fetch attempts
pub mod fetcher;

/// Production observability metrics
pub mod metrics;

/// Local file layout and archive handling
pub mod output;

/// Outcome aggregation and reporting
pub mod report;

/// Resume capability for bulk downloads
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use catalog::{RetrievalRequest, RetrievalTarget};
pub use downloader::DownloadExecutor;
pub use report::{RunOutcome, RunSummary};

/// Climate variable published by PRISM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variable {
    /// Total precipitation
    Ppt,
    /// Minimum temperature
    Tmin,
    /// Maximum temperature
    Tmax,
    /// Mean temperature
    Tmean,
    /// Mean dew point temperature
    Tdmean,
    /// Minimum vapor pressure deficit
    Vpdmin,
    /// Maximum vapor pressure deficit
    Vpdmax,
}

impl Variable {
    /// Every variable, in upstream listing order
    pub const ALL: [Variable; 7] = [
        Variable::Ppt,
        Variable::Tmin,
        Variable::Tmax,
        Variable::Tmean,
        Variable::Tdmean,
        Variable::Vpdmin,
        Variable::Vpdmax,
    ];

    /// Upstream code used in URLs and filenames
    pub fn code(&self) -> &'static str {
        match self {
            Variable::Ppt => "ppt",
            Variable::Tmin => "tmin",
            Variable::Tmax => "tmax",
            Variable::Tmean => "tmean",
            Variable::Tdmean => "tdmean",
            Variable::Vpdmin => "vpdmin",
            Variable::Vpdmax => "vpdmax",
        }
    }

    /// Measurement unit of the gridded values
    pub fn unit(&self) -> &'static str {
        match self {
            Variable::Ppt => "mm",
            Variable::Tmin | Variable::Tmax | Variable::Tmean | Variable::Tdmean => "°C",
            Variable::Vpdmin | Variable::Vpdmax => "hPa",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Variable::Ppt => "Precipitation",
            Variable::Tmin => "Minimum temperature",
            Variable::Tmax => "Maximum temperature",
            Variable::Tmean => "Mean temperature",
            Variable::Tdmean => "Mean dew point temperature",
            Variable::Vpdmin => "Minimum vapor pressure deficit",
            Variable::Vpdmax => "Maximum vapor pressure deficit",
        }
    }

    /// Whether the variable is published at the given temporal resolution.
    ///
    /// Annual grids exist only for precipitation and the three air temperatures.
    pub fn supports(&self, resolution: TemporalResolution) -> bool {
        match resolution {
            TemporalResolution::Daily | TemporalResolution::Monthly => true,
            TemporalResolution::Annual => matches!(
                self,
                Variable::Ppt | Variable::Tmin | Variable::Tmax | Variable::Tmean
            ),
        }
    }

    /// Earliest date for which the variable is available at the given resolution
    pub fn earliest_available(&self, resolution: TemporalResolution) -> NaiveDate {
        match resolution {
            TemporalResolution::Daily => DAILY_RECORD_START,
            TemporalResolution::Monthly | TemporalResolution::Annual => HISTORICAL_RECORD_START,
        }
    }

    /// Variables available at a resolution, in listing order
    pub fn available_for(resolution: TemporalResolution) -> Vec<Variable> {
        Self::ALL
            .into_iter()
            .filter(|v| v.supports(resolution))
            .collect()
    }
}

/// Start of the daily record (AN81d series)
const DAILY_RECORD_START: NaiveDate = match NaiveDate::from_ymd_opt(1981, 1, 1) {
    Some(date) => date,
    None => panic!("valid constant date"),
};

/// Start of the monthly/annual historical record
const HISTORICAL_RECORD_START: NaiveDate = match NaiveDate::from_ymd_opt(1895, 1, 1) {
    Some(date) => date,
    None => panic!("valid constant date"),
};

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Variable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ppt" => Ok(Variable::Ppt),
            "tmin" => Ok(Variable::Tmin),
            "tmax" => Ok(Variable::Tmax),
            "tmean" => Ok(Variable::Tmean),
            "tdmean" => Ok(Variable::Tdmean),
            "vpdmin" => Ok(Variable::Vpdmin),
            "vpdmax" => Ok(Variable::Vpdmax),
            _ => Err(format!(
                "Invalid variable: {s}. Valid options: ppt, tmin, tmax, tmean, tdmean, vpdmin, vpdmax"
            )),
        }
    }
}

/// Temporal resolution of a PRISM grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalResolution {
    /// One grid per day
    Daily,
    /// One grid per calendar month
    Monthly,
    /// One grid per calendar year
    Annual,
}

impl TemporalResolution {
    /// Directory / URL segment name
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalResolution::Daily => "daily",
            TemporalResolution::Monthly => "monthly",
            TemporalResolution::Annual => "annual",
        }
    }

    /// Dataset suffix appended to the spatial resolution in filenames (`4kmD2`, `4kmM3`)
    pub fn dataset_suffix(&self) -> &'static str {
        match self {
            TemporalResolution::Daily => "D2",
            TemporalResolution::Monthly | TemporalResolution::Annual => "M3",
        }
    }
}

impl std::fmt::Display for TemporalResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TemporalResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(TemporalResolution::Daily),
            "monthly" => Ok(TemporalResolution::Monthly),
            "annual" => Ok(TemporalResolution::Annual),
            _ => Err(format!(
                "Invalid temporal resolution: {s}. Valid options: daily, monthly, annual"
            )),
        }
    }
}

/// Spatial resolution of a PRISM grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpatialResolution {
    /// ~4 km cells (public default)
    #[default]
    #[serde(rename = "4km")]
    FourKm,
    /// ~800 m cells
    #[serde(rename = "800m")]
    EightHundredM,
}

impl SpatialResolution {
    /// URL and filename segment
    pub fn as_str(&self) -> &'static str {
        match self {
            SpatialResolution::FourKm => "4km",
            SpatialResolution::EightHundredM => "800m",
        }
    }
}

impl std::fmt::Display for SpatialResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpatialResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "4km" => Ok(SpatialResolution::FourKm),
            "800m" => Ok(SpatialResolution::EightHundredM),
            _ => Err(format!(
                "Invalid spatial resolution: {s}. Valid options: 4km, 800m"
            )),
        }
    }
}

/// Upstream release tag distinguishing provisional from stable grids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityCode {
    /// First release, produced within days of the period
    Early,
    /// Recent period, may still be revised upstream
    Provisional,
    /// Final release
    Stable,
}

impl StabilityCode {
    /// Tag used in archive filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            StabilityCode::Early => "early",
            StabilityCode::Provisional => "provisional",
            StabilityCode::Stable => "stable",
        }
    }
}

impl std::fmt::Display for StabilityCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StabilityCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "early" => Ok(StabilityCode::Early),
            "provisional" => Ok(StabilityCode::Provisional),
            "stable" => Ok(StabilityCode::Stable),
            _ => Err(format!("Invalid stability code: {s}")),
        }
    }
}
