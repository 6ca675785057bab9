//! Download configuration constants and retry/pool settings

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base URL of the PRISM web service (primary transport).
pub const PRIMARY_BASE_URL: &str = "https://services.nacse.org/prism/data/public";

/// Base URL of the HTTP view of the PRISM archive tree (fallback transport).
pub const FALLBACK_BASE_URL: &str = "https://ftp.prism.oregonstate.edu";

/// Default number of concurrent worker lanes.
/// The upstream service asks for modest parallelism; 4 lanes keep a bulk run well
/// inside that while still overlapping network latency.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Upper bound accepted for `--concurrency`.
pub const MAX_CONCURRENCY: usize = 32;

/// Maximum number of attempts per target, including the first one.
pub const MAX_ATTEMPTS: u32 = 5;

/// Base delay before the second attempt, in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Backoff ceiling in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Symmetric jitter applied to each backoff delay (0.2 = ±20%).
pub const DEFAULT_JITTER_FRACTION: f64 = 0.2;

/// Minimum spacing between two requests issued by the same lane, in milliseconds.
pub const POLITENESS_DELAY_MS: u64 = 500;

/// How long in-flight targets may keep running after cancellation, in seconds.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Smallest local file that counts as already downloaded, in bytes.
pub const MIN_FILE_SIZE: u64 = 1;

/// Connect timeout for both transports.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout. 800m daily bundles run to tens of megabytes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of consecutive primary failures before switching to fallback
pub fn default_fallback_after(max_attempts: u32) -> u32 {
    (max_attempts / 2).max(1)
}

/// Retry/backoff parameters for a single target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts allowed per target (>= 1)
    pub max_attempts: u32,
    /// Delay before attempt 2
    pub base_delay: Duration,
    /// Ceiling for the un-jittered delay
    pub max_delay: Duration,
    /// Jitter fraction `j`; delays are scaled by `1 + U[-j, +j]`
    pub jitter_fraction: f64,
    /// Consecutive transient failures on primary before switching to fallback
    pub fallback_after: u32,
    /// Retry on fallback when primary answers not-found
    pub fallback_on_not_found: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS)
    }
}

impl RetryConfig {
    /// Defaults with a custom attempt budget; `fallback_after` follows the budget
    pub fn new(max_attempts: u32) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            base_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            fallback_after: default_fallback_after(max_attempts),
            fallback_on_not_found: false,
        }
    }

    /// Set base and maximum delay
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Set the jitter fraction (clamped to `[0, 1]`)
    pub fn with_jitter(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction.clamp(0.0, 1.0);
        self
    }

    /// Set the fallback threshold (at least 1)
    pub fn with_fallback_after(mut self, fallback_after: u32) -> Self {
        self.fallback_after = fallback_after.max(1);
        self
    }

    /// Enable fallback retries after a primary not-found
    pub fn with_fallback_on_not_found(mut self, enabled: bool) -> Self {
        self.fallback_on_not_found = enabled;
        self
    }

    /// Un-jittered delay before `attempt` (1-based); zero for the first attempt
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = attempt - 2;
        let delay = match 2u32.checked_pow(exponent) {
            Some(factor) => self.base_delay.saturating_mul(factor),
            None => self.max_delay,
        };
        delay.min(self.max_delay)
    }

    /// Jittered delay before `attempt` (1-based)
    pub fn delay_before<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() || self.jitter_fraction <= 0.0 {
            return ceiling;
        }
        let j = self.jitter_fraction;
        ceiling.mul_f64(1.0 + rng.gen_range(-j..=j))
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker lanes
    pub max_concurrency: usize,
    /// Minimum spacing between requests on one lane
    pub politeness_delay: Duration,
    /// Drain window after cancellation before lanes are aborted
    pub grace_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            politeness_delay: Duration::from_millis(POLITENESS_DELAY_MS),
            grace_period: Duration::from_secs(SHUTDOWN_GRACE_SECS),
        }
    }
}
