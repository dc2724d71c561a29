use std::fmt;

use chrono::{DateTime, Utc};
use serde_derive::Serialize;

/// Running totals for one scan.
///
/// `total` is the strategy's estimate taken when the scan starts and is not
/// revised afterwards, so a smart scan that skips ports finishes below 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub total: u64,
    pub completed: u64,
    pub valid: u64,
    pub invalid: u64,
    pub started_at: DateTime<Utc>,
}

impl ScanProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: 0,
            valid: 0,
            invalid: 0,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn record(&mut self, valid: bool) {
        self.completed += 1;
        if valid {
            self.valid += 1;
        } else {
            self.invalid += 1;
        }
    }

    pub const fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.completed)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Lifecycle of an orchestrator. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// A progress observer returned an error.
    Failed,
}

impl ScanState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        })
    }
}
