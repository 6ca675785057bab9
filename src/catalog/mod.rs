//! Target catalog generation
//!
//! The catalog is the pure front end of a run: it validates a [`RetrievalRequest`] and
//! expands it into the ordered list of [`RetrievalTarget`]s that the rest of the
//! pipeline works through. No I/O happens here; "today" is injected through
//! [`RetrievalRequest::reference_date`] so the same request always yields the same
//! catalog.
//!
//! # Ordering
//!
//! Targets are ordered chronologically first, then by variable in request order.
//! Each target records its position as [`RetrievalTarget::ordinal`], which the reporter
//! uses to keep summaries stable regardless of completion order.
//!
//! # Validation
//!
//! Every problem with a request is collected into one [`ConfigurationError`] so the
//! caller sees all of them at once instead of fixing them one run at a time.

pub mod period;
pub mod stability;

pub use period::{periods_between, Period};
pub use stability::StabilityPolicy;

use crate::downloader::config::{DEFAULT_CONCURRENCY, FALLBACK_BASE_URL, PRIMARY_BASE_URL};
use crate::output::{archive_file_name, TargetPathBuilder};
use crate::{SpatialResolution, StabilityCode, TemporalResolution, Variable};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Remote endpoints for both transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Web service base, e.g. `https://services.nacse.org/prism/data/public`
    pub primary_base: String,
    /// Archive tree base, e.g. `https://ftp.prism.oregonstate.edu`
    pub fallback_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            primary_base: PRIMARY_BASE_URL.to_string(),
            fallback_base: FALLBACK_BASE_URL.to_string(),
        }
    }
}

/// What to download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// First day of the requested range (inclusive)
    pub date_start: NaiveDate,
    /// Last day of the requested range (inclusive)
    pub date_end: NaiveDate,
    /// Requested variables; duplicates collapse to their first occurrence
    pub variables: Vec<Variable>,
    /// Daily, monthly or annual grids
    pub temporal_resolution: TemporalResolution,
    /// 4km or 800m grids
    pub spatial_resolution: SpatialResolution,
    /// Root of the local archive tree
    pub output_root: PathBuf,
    /// Number of worker lanes
    pub max_concurrency: usize,
    /// Insert a `{temporal_resolution}/` directory level under each variable
    pub nest_by_resolution: bool,
    /// "Today" for stability classification and publication checks
    pub reference_date: NaiveDate,
    /// Stability classification rules
    pub stability: StabilityPolicy,
    /// Remote base URLs
    pub endpoints: Endpoints,
}

impl RetrievalRequest {
    /// Create a request with default concurrency, 4km grids, nested layout and today's date
    pub fn new(
        date_start: NaiveDate,
        date_end: NaiveDate,
        variables: Vec<Variable>,
        temporal_resolution: TemporalResolution,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            date_start,
            date_end,
            variables,
            temporal_resolution,
            spatial_resolution: SpatialResolution::default(),
            output_root: output_root.into(),
            max_concurrency: DEFAULT_CONCURRENCY,
            nest_by_resolution: true,
            reference_date: Utc::now().date_naive(),
            stability: StabilityPolicy::default(),
            endpoints: Endpoints::default(),
        }
    }

    /// Set the number of worker lanes
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the spatial resolution
    pub fn with_spatial_resolution(mut self, spatial: SpatialResolution) -> Self {
        self.spatial_resolution = spatial;
        self
    }

    /// Toggle the per-resolution directory level
    pub fn with_nesting(mut self, nest_by_resolution: bool) -> Self {
        self.nest_by_resolution = nest_by_resolution;
        self
    }

    /// Pin the reference date
    pub fn with_reference_date(mut self, reference_date: NaiveDate) -> Self {
        self.reference_date = reference_date;
        self
    }

    /// Set the stability policy
    pub fn with_stability_policy(mut self, stability: StabilityPolicy) -> Self {
        self.stability = stability;
        self
    }

    /// Set the remote endpoints
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Requested variables with duplicates removed, first occurrence wins
    pub fn unique_variables(&self) -> Vec<Variable> {
        let mut seen = Vec::with_capacity(self.variables.len());
        for variable in &self.variables {
            if !seen.contains(variable) {
                seen.push(*variable);
            }
        }
        seen
    }

    /// Check every request invariant, collecting all violations
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut violations = Vec::new();

        if self.date_start > self.date_end {
            violations.push(Violation::StartAfterEnd {
                start: self.date_start,
                end: self.date_end,
            });
        }

        let variables = self.unique_variables();
        if variables.is_empty() {
            violations.push(Violation::EmptyVariables);
        }

        if self.max_concurrency == 0 {
            violations.push(Violation::ZeroConcurrency);
        }

        for variable in &variables {
            if !variable.supports(self.temporal_resolution) {
                violations.push(Violation::UnsupportedCombination {
                    variable: *variable,
                    resolution: self.temporal_resolution,
                });
                continue;
            }
            let earliest = variable.earliest_available(self.temporal_resolution);
            if self.date_start < earliest {
                violations.push(Violation::BeforeEarliest {
                    variable: *variable,
                    resolution: self.temporal_resolution,
                    requested: self.date_start,
                    earliest,
                });
            }
        }

        if self.date_start <= self.date_end {
            if let Some(last) = Period::containing(self.date_end, self.temporal_resolution) {
                if last.start > self.reference_date {
                    violations.push(Violation::NotYetPublished {
                        period_key: last.key(),
                        reference: self.reference_date,
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError { violations })
        }
    }
}

/// One archive to retrieve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalTarget {
    /// Position in the catalog
    pub ordinal: usize,
    /// Climate variable
    pub variable: Variable,
    /// Temporal resolution
    pub temporal_resolution: TemporalResolution,
    /// Spatial resolution
    pub spatial_resolution: SpatialResolution,
    /// Calendar span covered
    pub period: Period,
    /// `YYYYMMDD`, `YYYYMM` or `YYYY`
    pub period_key: String,
    /// Release tag the archive is expected under
    pub stability: StabilityCode,
    /// Web service URL
    pub primary_url: String,
    /// Archive tree URL
    pub fallback_url: String,
    /// Final location on disk
    pub local_path: PathBuf,
}

impl RetrievalTarget {
    /// Short identity used in logs: `ppt/monthly/197101`
    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.variable, self.temporal_resolution, self.period_key
        )
    }
}

impl std::fmt::Display for RetrievalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single problem with a retrieval request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// Range is reversed
    #[error("start date {start} is after end date {end}")]
    StartAfterEnd {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },

    /// Nothing to download
    #[error("no variables requested")]
    EmptyVariables,

    /// Range begins before the variable's record starts
    #[error("{variable} {resolution} data starts {earliest}, but {requested} was requested")]
    BeforeEarliest {
        /// Offending variable
        variable: Variable,
        /// Requested resolution
        resolution: TemporalResolution,
        /// Requested start
        requested: NaiveDate,
        /// First available date
        earliest: NaiveDate,
    },

    /// Variable is not published at this resolution
    #[error("{variable} is not published at {resolution} resolution")]
    UnsupportedCombination {
        /// Offending variable
        variable: Variable,
        /// Requested resolution
        resolution: TemporalResolution,
    },

    /// Range reaches a period that has not started yet
    #[error("period {period_key} starts after {reference} and is not yet published")]
    NotYetPublished {
        /// First unpublished period
        period_key: String,
        /// Reference date used
        reference: NaiveDate,
    },

    /// Worker pool would have no lanes
    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Aggregate request validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid retrieval request: {}", join_violations(.violations))]
pub struct ConfigurationError {
    /// Every violation found, in check order
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate `request` and expand it into ordered retrieval targets
pub fn build_catalog(request: &RetrievalRequest) -> Result<Vec<RetrievalTarget>, ConfigurationError> {
    request.validate()?;

    let variables = request.unique_variables();
    let periods = periods_between(
        request.date_start,
        request.date_end,
        request.temporal_resolution,
    );

    let mut targets = Vec::with_capacity(periods.len() * variables.len());
    for period in &periods {
        let stability = request.stability.classify(period, request.reference_date);
        let period_key = period.key();
        for variable in &variables {
            targets.push(RetrievalTarget {
                ordinal: targets.len(),
                variable: *variable,
                temporal_resolution: request.temporal_resolution,
                spatial_resolution: request.spatial_resolution,
                period: *period,
                period_key: period_key.clone(),
                stability,
                primary_url: primary_url(&request.endpoints, request.spatial_resolution, *variable, &period_key),
                fallback_url: fallback_url(
                    &request.endpoints,
                    *variable,
                    stability,
                    request.spatial_resolution,
                    period,
                ),
                local_path: TargetPathBuilder::new(
                    request.output_root.clone(),
                    *variable,
                    request.temporal_resolution,
                )
                .with_spatial(request.spatial_resolution)
                .with_stability(stability)
                .with_period_key(period_key.as_str())
                .nested(request.nest_by_resolution)
                .build(),
            });
        }
    }

    Ok(targets)
}

fn primary_url(
    endpoints: &Endpoints,
    spatial: SpatialResolution,
    variable: Variable,
    period_key: &str,
) -> String {
    format!(
        "{}/{spatial}/{variable}/{period_key}",
        endpoints.primary_base.trim_end_matches('/')
    )
}

fn fallback_url(
    endpoints: &Endpoints,
    variable: Variable,
    stability: StabilityCode,
    spatial: SpatialResolution,
    period: &Period,
) -> String {
    let name = archive_file_name(variable, stability, spatial, period.resolution, &period.key());
    format!(
        "{}/{}/{variable}/{}/{name}",
        endpoints.fallback_base.trim_end_matches('/'),
        period.resolution,
        period.year()
    )
}
