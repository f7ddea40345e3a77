//! Error types for the job queue system.

use thiserror::Error;
use uuid::Uuid;

use crate::types::JobStatus;

/// Errors that may occur while interacting with the job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("invalid job options: {0}")]
    InvalidOptions(String),

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {id} is {status} and cannot be {action}")]
    InvalidState {
        id: Uuid,
        status: JobStatus,
        action: &'static str,
    },

    #[error("no processor registered for job type '{0}'")]
    MissingProcessor(String),

    #[error("job execution failed: {0}")]
    ExecutionFailed(String),

    #[error("cannot clean jobs with status {0}")]
    InvalidStatusFilter(JobStatus),

    #[error("unknown job status: {0}")]
    UnknownStatus(String),

    #[error("unknown queue event: {0}")]
    UnknownEvent(String),

    #[error("timed out waiting for {0} active workers to finish")]
    ShutdownTimeout(usize),
}
