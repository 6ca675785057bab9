//! Local path generation for downloaded archives
//!
//! Archives are laid out under the output root as
//! `{root}/{variable}/[{temporal_resolution}/]{archive_name}`, where the archive name is
//! the upstream filename (`PRISM_ppt_stable_4kmM3_197101_bil.zip`). Keeping the upstream
//! name means the local tree mirrors the archive tree file-for-file.
//!
//! # Usage Example
//!
//! ```rust
//! use prism_bulk_downloader::output::TargetPathBuilder;
//! use prism_bulk_downloader::{StabilityCode, TemporalResolution, Variable};
//! use std::path::PathBuf;
//!
//! let path = TargetPathBuilder::new(PathBuf::from("data"), Variable::Ppt, TemporalResolution::Monthly)
//!     .with_stability(StabilityCode::Stable)
//!     .with_period_key("197101")
//!     .build();
//!
//! assert_eq!(
//!     path,
//!     PathBuf::from("data/ppt/monthly/PRISM_ppt_stable_4kmM3_197101_bil.zip")
//! );
//! ```

use crate::{SpatialResolution, StabilityCode, TemporalResolution, Variable};
use std::path::PathBuf;

/// Upstream archive filename for one grid
pub fn archive_file_name(
    variable: Variable,
    stability: StabilityCode,
    spatial: SpatialResolution,
    temporal: TemporalResolution,
    period_key: &str,
) -> String {
    format!(
        "PRISM_{variable}_{stability}_{spatial}{}_{period_key}_bil.zip",
        temporal.dataset_suffix()
    )
}

/// Path builder for the local archive tree
#[derive(Debug, Clone)]
pub struct TargetPathBuilder {
    root_dir: PathBuf,
    variable: Variable,
    temporal: TemporalResolution,
    spatial: SpatialResolution,
    stability: StabilityCode,
    period_key: String,
    nest_by_resolution: bool,
}

impl TargetPathBuilder {
    /// Create a new path builder
    ///
    /// # Arguments
    ///
    /// * `root_dir` - Output root (e.g., "prism_data")
    /// * `variable` - Climate variable, used as the first directory level
    /// * `temporal` - Temporal resolution, used as the optional second level
    pub fn new(root_dir: PathBuf, variable: Variable, temporal: TemporalResolution) -> Self {
        Self {
            root_dir,
            variable,
            temporal,
            spatial: SpatialResolution::default(),
            stability: StabilityCode::Stable,
            period_key: String::new(),
            nest_by_resolution: true,
        }
    }

    /// Set spatial resolution
    pub fn with_spatial(mut self, spatial: SpatialResolution) -> Self {
        self.spatial = spatial;
        self
    }

    /// Set stability code
    pub fn with_stability(mut self, stability: StabilityCode) -> Self {
        self.stability = stability;
        self
    }

    /// Set period key
    pub fn with_period_key(mut self, period_key: impl Into<String>) -> Self {
        self.period_key = period_key.into();
        self
    }

    /// Toggle the `{temporal_resolution}/` directory level
    pub fn nested(mut self, nest_by_resolution: bool) -> Self {
        self.nest_by_resolution = nest_by_resolution;
        self
    }

    /// Directory holding the archive
    pub fn directory(&self) -> PathBuf {
        let dir = self.root_dir.join(self.variable.code());
        if self.nest_by_resolution {
            dir.join(self.temporal.as_str())
        } else {
            dir
        }
    }

    /// Archive filename
    pub fn file_name(&self) -> String {
        archive_file_name(
            self.variable,
            self.stability,
            self.spatial,
            self.temporal,
            &self.period_key,
        )
    }

    /// Build the complete file path
    pub fn build(&self) -> PathBuf {
        self.directory().join(self.file_name())
    }
}
