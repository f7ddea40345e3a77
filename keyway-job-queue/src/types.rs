//! Core types for the job queue system.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobQueueError;
use crate::options::JobOptions;

/// A request to enqueue a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobRequest {
    #[inline]
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            options: JobOptions::default(),
        }
    }

    #[inline]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub job_id: Uuid,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "delayed" => Ok(Self::Delayed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(JobQueueError::UnknownStatus(s.to_owned())),
        }
    }
}

/// A unit of work tracked by the queue.
///
/// Callers only ever see clones; the queue owns the authoritative record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: Value,
    pub options: JobOptions,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl Job {
    /// Create a job from a validated request.
    ///
    /// The job starts `delayed` when the request carries a delay, `pending` otherwise.
    pub fn from_request(request: JobRequest) -> Self {
        let status = if request.options.delay_ms > 0 {
            JobStatus::Delayed
        } else {
            JobStatus::Pending
        };
        Self {
            id: Uuid::new_v4(),
            job_type: request.job_type,
            payload: request.payload,
            max_attempts: request.options.attempts,
            options: request.options,
            status,
            attempts: 0,
            created_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            result: None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt is allowed after the current one.
    #[inline]
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// When the job reached its terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            JobStatus::Completed => self.completed_at,
            JobStatus::Failed => self.failed_at,
            _ => None,
        }
    }

    /// Mark the job as picked up by a worker.
    pub(crate) fn activate(&mut self) {
        self.status = JobStatus::Active;
        self.attempts += 1;
        self.processed_at = Some(Utc::now());
        self.error = None;
    }

    /// Mark the job as completed with the processor's result.
    pub(crate) fn complete(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Mark the job as permanently failed.
    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failed_at = Some(Utc::now());
        self.error = Some(message.into());
    }

    /// Park the job after a failed attempt; it becomes pending again on promotion.
    pub(crate) fn defer_retry(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Delayed;
        self.error = Some(message.into());
    }

    /// Move a delayed job back into the pending pool.
    pub(crate) fn promote(&mut self) -> bool {
        if self.status != JobStatus::Delayed {
            return false;
        }
        self.status = JobStatus::Pending;
        true
    }

    /// Reset a failed job so it can run through all of its attempts again.
    pub(crate) fn requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.failed_at = None;
        self.error = None;
    }
}

/// Live projection of the job store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub is_running: bool,
    pub active_workers: usize,
}

impl QueueStats {
    pub(crate) fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Active => self.active += 1,
            JobStatus::Delayed => self.delayed += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}
