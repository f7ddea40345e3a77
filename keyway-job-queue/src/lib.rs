//! In-process background job scheduler used by the Keyway API manager.
//!
//! Jobs are submitted with a type, an opaque JSON payload and [`JobOptions`].
//! A periodic dispatch loop picks pending jobs by priority and hands them to
//! the [`JobProcessor`] registered for their type, never running more than
//! `max_workers` at once. Failed attempts are retried with fixed or
//! exponential backoff until the job runs out of attempts.
//!
//! # Architecture
//!
//! - [`JobQueue`] - Owns the job store, processor registry and dispatch loop
//! - [`JobProcessor`] - Trait for implementing job handlers
//! - [`Job`] - A unit of work and its lifecycle state
//! - [`QueueEvent`] - Lifecycle notifications for observers
//!
//! # Example
//!
//! ```rust,no_run
//! use keyway_job_queue::{async_trait, Job, JobOptions, JobProcessor, JobQueue, JobQueueError};
//! use serde_json::{json, Value};
//!
//! struct HealthCheck;
//!
//! #[async_trait]
//! impl JobProcessor for HealthCheck {
//!     fn job_type(&self) -> &str {
//!         "health.check"
//!     }
//!
//!     async fn process(&self, job: &Job) -> Result<Value, JobQueueError> {
//!         println!("Checking {}", job.payload["endpoint"]);
//!         Ok(json!({ "healthy": true }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = JobQueue::new();
//!     queue.register_processor(HealthCheck).await;
//!
//!     let job_id = queue
//!         .submit("health.check", json!({"endpoint": "/v1/users"}), JobOptions::default())
//!         .await
//!         .unwrap();
//!     println!("Enqueued job: {}", job_id);
//! }
//! ```

mod config;
mod error;
mod events;
mod options;
mod processor;
mod queue;
mod store;
mod types;

pub use config::{QueueConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_WORKERS, DEFAULT_TICK_INTERVAL};
pub use error::JobQueueError;
pub use events::{EventKind, Listener, QueueEvent};
pub use options::{Backoff, BackoffKind, JobOptions, DEFAULT_ATTEMPTS, DEFAULT_BACKOFF_DELAY_MS};
pub use processor::{FnProcessor, JobProcessor, NoOpProcessor};
pub use queue::JobQueue;
pub use types::{EnqueueResult, Job, JobRequest, JobStatus, QueueStats};

// Re-export async_trait for convenience when implementing JobProcessor
pub use async_trait::async_trait;
