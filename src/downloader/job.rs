//! Per-target lifecycle tracking
//!
//! ```text
//! Pending ──► Skipped
//!    │
//!    └──► InFlight ──► Succeeded
//!           │  ▲   └──► Failed
//!           ▼  │
//!         Retrying ──► Failed (cancelled between attempts)
//! ```
//!
//! Terminal states never change again, and only targets in a terminal state are
//! handed to the aggregator as a [`TargetReport`].

use crate::catalog::RetrievalTarget;
use crate::fetcher::{ErrorKind, TransportKind};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TargetState {
    /// Not yet looked at
    #[default]
    Pending,
    /// Already present locally
    Skipped,
    /// An attempt is running
    InFlight {
        /// Attempt number (1-based)
        attempt: u32,
        /// Source in use
        transport: TransportKind,
    },
    /// Waiting to retry after a failed attempt
    Retrying {
        /// Attempt that failed
        attempt: u32,
        /// Why it failed
        error_kind: ErrorKind,
    },
    /// File committed
    Succeeded {
        /// Attempts used
        attempts: u32,
        /// Bytes committed
        bytes: u64,
        /// SHA-256 of the committed file
        sha256: String,
    },
    /// Gave up
    Failed {
        /// Attempts used
        attempts: u32,
        /// Final error classification
        error_kind: ErrorKind,
        /// Final error detail
        detail: String,
    },
}

impl TargetState {
    /// Lowercase state name
    pub fn label(&self) -> &'static str {
        match self {
            TargetState::Pending => "pending",
            TargetState::Skipped => "skipped",
            TargetState::InFlight { .. } => "in_flight",
            TargetState::Retrying { .. } => "retrying",
            TargetState::Succeeded { .. } => "succeeded",
            TargetState::Failed { .. } => "failed",
        }
    }

    /// Whether the state can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetState::Skipped | TargetState::Succeeded { .. } | TargetState::Failed { .. }
        )
    }

    /// Move to `next`, rejecting moves the lifecycle does not allow
    pub fn transition(self, next: TargetState) -> Result<TargetState, InvalidTransition> {
        let allowed = match (&self, &next) {
            (TargetState::Pending, TargetState::Skipped) => true,
            (TargetState::Pending, TargetState::InFlight { attempt, .. }) => *attempt == 1,
            (TargetState::Pending, TargetState::Failed { attempts, .. }) => *attempts == 0,
            (TargetState::InFlight { .. }, TargetState::Succeeded { .. }) => true,
            (TargetState::InFlight { .. }, TargetState::Failed { .. }) => true,
            (TargetState::InFlight { attempt: a, .. }, TargetState::Retrying { attempt: b, .. }) => a == b,
            (TargetState::Retrying { attempt: a, .. }, TargetState::InFlight { attempt: b, .. }) => *b == a + 1,
            (TargetState::Retrying { .. }, TargetState::Failed { .. }) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self.label(),
                to: next.label(),
            })
        }
    }
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal target state transition: {from} -> {to}")]
pub struct InvalidTransition {
    /// State before
    pub from: &'static str,
    /// Requested state
    pub to: &'static str,
}

/// A target in its terminal state, as delivered to the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    /// The target
    pub target: RetrievalTarget,
    /// Its terminal state
    pub state: TargetState,
}

impl TargetReport {
    /// Final error kind, for failed targets
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.state {
            TargetState::Failed { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }

    /// Attempts spent on the target
    pub fn attempts(&self) -> u32 {
        match &self.state {
            TargetState::Succeeded { attempts, .. } | TargetState::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}
