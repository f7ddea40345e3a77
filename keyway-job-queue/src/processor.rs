//! Processor trait for implementing job handlers.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobQueueError;
use crate::types::Job;

/// Trait for implementing job processors.
///
/// Processors perform the actual work of a job. Each job type has at most one
/// registered processor; registering another for the same type replaces it.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Returns the job type this processor handles.
    fn job_type(&self) -> &str;

    /// Process the job, returning the value stored as the job's result.
    ///
    /// An error marks the attempt as failed and is retried per the job's options.
    async fn process(&self, job: &Job) -> Result<Value, JobQueueError>;
}

/// A no-op processor that immediately completes jobs with a `null` result.
///
/// This is useful for testing or as a placeholder when the actual job
/// implementation isn't ready yet.
#[derive(Debug, Default, Clone)]
pub struct NoOpProcessor {
    job_type: String,
}

impl NoOpProcessor {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl JobProcessor for NoOpProcessor {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn process(&self, _job: &Job) -> Result<Value, JobQueueError> {
        Ok(Value::Null)
    }
}

/// Adapts an async closure into a [`JobProcessor`].
///
/// The closure receives its own copy of the job.
pub struct FnProcessor<F> {
    job_type: String,
    handler: F,
}

impl<F> FnProcessor<F> {
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

impl<F> std::fmt::Debug for FnProcessor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor")
            .field("job_type", &self.job_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, JobQueueError>> + Send,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn process(&self, job: &Job) -> Result<Value, JobQueueError> {
        (self.handler)(job.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobRequest;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_processor() {
        let processor = NoOpProcessor::new("health.check");
        assert_eq!(processor.job_type(), "health.check");

        let job = Job::from_request(JobRequest::new("health.check", json!({"target": "api"})));
        let result = processor.process(&job).await;
        assert_eq!(result.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_fn_processor_sees_payload() {
        let processor = FnProcessor::new("notification.send", |job: Job| async move {
            let to = job.payload["to"].as_str().unwrap_or_default().to_owned();
            Ok::<_, JobQueueError>(json!({ "delivered_to": to }))
        });
        assert_eq!(processor.job_type(), "notification.send");

        let job = Job::from_request(JobRequest::new(
            "notification.send",
            json!({"to": "ops@example.com"}),
        ));
        let result = processor.process(&job).await.unwrap();
        assert_eq!(result["delivered_to"], "ops@example.com");
    }

    #[tokio::test]
    async fn test_fn_processor_propagates_errors() {
        let processor = FnProcessor::new("backup.create", |_job: Job| async move {
            Err::<Value, _>(JobQueueError::ExecutionFailed("disk full".into()))
        });
        let job = Job::from_request(JobRequest::new("backup.create", Value::Null));
        let err = processor.process(&job).await.unwrap_err();
        assert_eq!(err.to_string(), "job execution failed: disk full");
    }
}
