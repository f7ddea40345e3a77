//! Runtime settings of a [`JobQueue`](crate::JobQueue).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::JobQueueError;

pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Ceiling on concurrently running processor calls.
    pub max_workers: usize,
    /// Period of the dispatch loop.
    pub tick_interval: Duration,
    /// Start the dispatch loop on the first submission.
    pub auto_start: bool,
    /// Events buffered per broadcast subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            auto_start: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn validate(&self) -> Result<(), JobQueueError> {
        if self.max_workers == 0 {
            return Err(JobQueueError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(JobQueueError::InvalidConfig(
                "tick_interval must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(JobQueueError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
