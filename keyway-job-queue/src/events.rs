//! Lifecycle notifications.
//!
//! Events are informational only: the queue never reacts to its own events.
//! Consumers either hold a broadcast [`Receiver`](tokio::sync::broadcast::Receiver)
//! or register synchronous listeners per [`EventKind`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::JobQueueError;
use crate::types::Job;

/// A queue lifecycle event. Job events carry a snapshot taken at the transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "job", rename_all = "lowercase")]
pub enum QueueEvent {
    Added(Job),
    Active(Job),
    Completed(Job),
    Failed(Job),
    Retry(Job),
    Removed(Job),
    Started,
    Stopped,
    Paused,
    Resumed,
    Emptied,
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added(_) => EventKind::Added,
            Self::Active(_) => EventKind::Active,
            Self::Completed(_) => EventKind::Completed,
            Self::Failed(_) => EventKind::Failed,
            Self::Retry(_) => EventKind::Retry,
            Self::Removed(_) => EventKind::Removed,
            Self::Started => EventKind::Started,
            Self::Stopped => EventKind::Stopped,
            Self::Paused => EventKind::Paused,
            Self::Resumed => EventKind::Resumed,
            Self::Emptied => EventKind::Emptied,
        }
    }

    /// The job snapshot, for job-scoped events.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Added(job)
            | Self::Active(job)
            | Self::Completed(job)
            | Self::Failed(job)
            | Self::Retry(job)
            | Self::Removed(job) => Some(job),
            _ => None,
        }
    }
}

/// Event names listeners can subscribe to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Active,
    Completed,
    Failed,
    Retry,
    Removed,
    Started,
    Stopped,
    Paused,
    Resumed,
    Emptied,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Removed => "removed",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Emptied => "emptied",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = JobQueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "added" => Self::Added,
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "retry" => Self::Retry,
            "removed" => Self::Removed,
            "started" => Self::Started,
            "stopped" => Self::Stopped,
            "paused" => Self::Paused,
            "resumed" => Self::Resumed,
            "emptied" => Self::Emptied,
            other => return Err(JobQueueError::UnknownEvent(other.to_owned())),
        };
        Ok(kind)
    }
}

/// Callback invoked synchronously for every matching event.
pub type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Fan-out of queue events to broadcast subscribers and registered listeners.
pub(crate) struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
    listeners: DashMap<EventKind, Vec<Listener>>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            listeners: DashMap::new(),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn on(&self, kind: EventKind, listener: Listener) {
        self.listeners.entry(kind).or_default().push(listener);
    }

    /// Deliver an event. Having no subscribers is not an error, and a
    /// panicking listener is logged and skipped.
    pub(crate) fn emit(&self, event: QueueEvent) {
        // Snapshot so a listener may register further listeners without
        // deadlocking on the shard lock.
        let listeners = self
            .listeners
            .get(&event.kind())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = %event.kind(), "event listener panicked");
            }
        }
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .field("listener_kinds", &self.listeners.len())
            .finish()
    }
}
