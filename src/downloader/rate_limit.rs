//! Per-lane politeness pacing
//!
//! Each worker lane owns a [`LanePacer`] that keeps a minimum spacing between the
//! requests it issues. This is separate from retry backoff: a lane moving straight
//! from one successful target to the next still waits out the politeness delay.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Enforces a minimum interval between consecutive requests on one lane
#[derive(Debug, Clone)]
pub struct LanePacer {
    interval: Duration,
    last_request: Option<Instant>,
}

impl LanePacer {
    /// Create a pacer; a zero interval disables pacing
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: None,
        }
    }

    /// Configured spacing
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next request may be issued, then mark it as issued.
    ///
    /// Returns how long the call slept.
    pub async fn wait(&mut self) -> Duration {
        let now = Instant::now();
        let mut waited = Duration::ZERO;
        if let Some(last) = self.last_request {
            let ready_at = last + self.interval;
            if ready_at > now {
                waited = ready_at - now;
                sleep_until(ready_at).await;
            }
        }
        self.last_request = Some(Instant::now());
        waited
    }
}
