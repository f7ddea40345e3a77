//! Per-job submission options and retry backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::JobQueueError;

/// Attempts granted to a job when none are configured.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Base delay of the default exponential backoff.
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 1000;

/// Strategy used to space out retries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Retry backoff: a strategy and its base delay in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    #[serde(rename = "delay")]
    pub delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(DEFAULT_BACKOFF_DELAY_MS)
    }
}

impl Backoff {
    #[inline]
    pub const fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms,
        }
    }

    #[inline]
    pub const fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms,
        }
    }

    /// Delay before the retry that follows the `attempts`-th failed attempt.
    ///
    /// `attempts` counts the attempt that just failed, so the first retry waits
    /// the base delay and each exponential retry after that doubles it.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let millis = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempts.saturating_sub(1);
                1u64.checked_shl(exponent)
                    .map(|factor| self.delay_ms.saturating_mul(factor))
                    .unwrap_or(u64::MAX)
            }
        };
        Duration::from_millis(millis)
    }
}

/// Immutable configuration supplied when a job is submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobOptions {
    /// Higher values are dispatched first among pending jobs.
    pub priority: i32,
    /// Time the job spends `delayed` before it first becomes eligible.
    pub delay_ms: u64,
    /// Maximum number of execution attempts, at least 1.
    pub attempts: u32,
    pub backoff: Backoff,
    /// Purge a completed job this long after it completes.
    pub remove_on_complete_ms: Option<u64>,
    /// Purge a failed job this long after it fails.
    pub remove_on_fail_ms: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay_ms: 0,
            attempts: DEFAULT_ATTEMPTS,
            backoff: Backoff::default(),
            remove_on_complete_ms: None,
            remove_on_fail_ms: None,
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = duration_millis(delay);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn remove_on_complete(mut self, after: Duration) -> Self {
        self.remove_on_complete_ms = Some(duration_millis(after));
        self
    }

    pub fn remove_on_fail(mut self, after: Duration) -> Self {
        self.remove_on_fail_ms = Some(duration_millis(after));
        self
    }

    #[inline]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Reject options that cannot describe a runnable job.
    pub fn validate(&self) -> Result<(), JobQueueError> {
        if self.attempts == 0 {
            return Err(JobQueueError::InvalidOptions(
                "attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
