//! Job queue implementation: store, processor registry, dispatch loop and timers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::JobQueueError;
use crate::events::{EventBus, EventKind, QueueEvent};
use crate::options::JobOptions;
use crate::processor::{FnProcessor, JobProcessor};
use crate::store::JobStore;
use crate::types::{EnqueueResult, Job, JobRequest, JobStatus, QueueStats};

/// How often [`JobQueue::close`] re-checks the worker count.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Inner {
    config: QueueConfig,
    store: RwLock<JobStore>,
    processors: RwLock<HashMap<String, Arc<dyn JobProcessor>>>,
    events: EventBus,
    active_workers: Arc<AtomicUsize>,
    /// Cancellation token of the running dispatch loop, if any.
    ticker: Mutex<Option<CancellationToken>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(token) = self.ticker.get_mut().take() {
            token.cancel();
        }
    }
}

/// One reserved unit of the worker budget, released on drop.
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process job scheduler.
///
/// Cloning is cheap and every clone drives the same queue. The dispatch loop
/// and all timers stop once the last clone is dropped.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.inner.config)
            .field("store", &"<RwLock<JobStore>>")
            .field(
                "processors",
                &"<RwLock<HashMap<String, Arc<dyn JobProcessor>>>>",
            )
            .field("events", &self.inner.events)
            .field("active_workers", &self.active_workers())
            .finish()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Create a queue with the default [`QueueConfig`].
    pub fn new() -> Self {
        Self::build(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Result<Self, JobQueueError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: QueueConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                store: RwLock::new(JobStore::default()),
                processors: RwLock::new(HashMap::new()),
                events,
                active_workers: Arc::new(AtomicUsize::new(0)),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Register a processor for the job type it reports, replacing any previous one.
    pub async fn register_processor<P: JobProcessor + 'static>(&self, processor: P) {
        let job_type = processor.job_type().to_owned();
        let mut processors = self.inner.processors.write().await;
        let replaced = processors
            .insert(job_type.clone(), Arc::new(processor))
            .is_some();
        debug!(job_type = %job_type, replaced, "registered job processor");
    }

    /// Register an async closure as the processor for `job_type`.
    pub async fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobQueueError>> + Send + 'static,
    {
        self.register_processor(FnProcessor::new(job_type, handler))
            .await;
    }

    pub async fn has_processor(&self, job_type: &str) -> bool {
        self.inner.processors.read().await.contains_key(job_type)
    }

    /// Enqueue a job for asynchronous processing.
    ///
    /// Only malformed options are rejected. A job type without a processor is
    /// accepted and fails on its first dispatch.
    pub async fn enqueue(&self, request: JobRequest) -> Result<EnqueueResult, JobQueueError> {
        request.options.validate()?;
        let job = Job::from_request(request);
        let job_id = job.id;

        {
            let mut store = self.inner.store.write().await;
            debug!(
                job_id = %job_id,
                job_type = %job.job_type,
                status = %job.status,
                priority = job.options.priority,
                "job added"
            );
            let delay = (job.status == JobStatus::Delayed).then(|| job.options.delay());
            self.inner.events.emit(QueueEvent::Added(job.clone()));
            store.insert(job);
            if let Some(delay) = delay {
                schedule_promotion(&self.inner, &mut store, job_id, delay);
            }
        }

        if self.inner.config.auto_start {
            self.start().await;
        }

        Ok(EnqueueResult { job_id })
    }

    /// Convenience wrapper around [`enqueue`](Self::enqueue).
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        options: JobOptions,
    ) -> Result<Uuid, JobQueueError> {
        let request = JobRequest::new(job_type, payload).with_options(options);
        Ok(self.enqueue(request).await?.job_id)
    }

    /// Get a snapshot of a job by ID.
    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        let store = self.inner.store.read().await;
        store.get(&id).cloned()
    }

    /// List jobs in creation order, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let store = self.inner.store.read().await;
        store
            .iter()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect()
    }

    /// Page through jobs, most recent first.
    pub async fn recent_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<Job> {
        let store = self.inner.store.read().await;
        store
            .iter()
            .rev()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn count_jobs(&self, status: Option<JobStatus>) -> usize {
        let store = self.inner.store.read().await;
        store.count(status)
    }

    /// Counts per status, computed from the store on every call.
    pub async fn stats(&self) -> QueueStats {
        let is_running = self.is_running().await;
        let store = self.inner.store.read().await;
        let mut stats = store.stats();
        stats.is_running = is_running;
        stats.active_workers = self.active_workers();
        stats
    }

    pub async fn is_running(&self) -> bool {
        self.inner.ticker.lock().await.is_some()
    }

    /// Number of worker slots currently held by running processors.
    pub fn active_workers(&self) -> usize {
        self.inner.active_workers.load(Ordering::SeqCst)
    }

    /// Remove a job that is not currently running.
    ///
    /// Returns false for unknown jobs and for active jobs, which cannot be cancelled.
    pub async fn remove_job(&self, id: Uuid) -> bool {
        let mut store = self.inner.store.write().await;
        let Some(job) = store.get(&id) else {
            return false;
        };
        if job.status == JobStatus::Active {
            debug!(job_id = %id, "refusing to remove active job");
            return false;
        }
        if let Some(job) = store.remove(&id) {
            info!(job_id = %id, job_type = %job.job_type, status = %job.status, "job removed");
            self.inner.events.emit(QueueEvent::Removed(job));
        }
        true
    }

    /// Send a failed job back to the pending pool with a fresh attempt budget.
    pub async fn retry_job(&self, id: Uuid) -> Result<Job, JobQueueError> {
        let snapshot = {
            let mut store = self.inner.store.write().await;
            let job = store.get_mut(&id).ok_or(JobQueueError::NotFound(id))?;
            if job.status != JobStatus::Failed {
                return Err(JobQueueError::InvalidState {
                    id,
                    status: job.status,
                    action: "retried",
                });
            }
            job.requeue();
            let snapshot = job.clone();
            store.cancel_timer(&id);
            info!(job_id = %id, job_type = %snapshot.job_type, "failed job re-queued");
            self.inner.events.emit(QueueEvent::Retry(snapshot.clone()));
            snapshot
        };

        if self.inner.config.auto_start {
            self.start().await;
        }
        Ok(snapshot)
    }

    /// Start the dispatch loop. Does nothing if it is already running.
    pub async fn start(&self) {
        if self.spawn_ticker().await {
            info!(
                max_workers = self.inner.config.max_workers,
                tick_ms = self.inner.config.tick_interval.as_millis() as u64,
                "job queue started"
            );
            self.inner.events.emit(QueueEvent::Started);
        }
    }

    /// Stop the dispatch loop. Running processors are left to finish.
    pub async fn stop(&self) {
        if self.halt_ticker().await {
            info!("job queue stopped");
            self.inner.events.emit(QueueEvent::Stopped);
        }
    }

    pub async fn pause(&self) {
        if self.halt_ticker().await {
            info!("job queue paused");
            self.inner.events.emit(QueueEvent::Paused);
        }
    }

    pub async fn resume(&self) {
        if self.spawn_ticker().await {
            info!("job queue resumed");
            self.inner.events.emit(QueueEvent::Resumed);
        }
    }

    /// Remove every pending and delayed job. Returns how many were removed.
    pub async fn empty(&self) -> usize {
        let mut store = self.inner.store.write().await;
        let removed = store.remove_where(|job| {
            matches!(job.status, JobStatus::Pending | JobStatus::Delayed)
        });
        info!(removed = removed.len(), "job queue emptied");
        self.inner.events.emit(QueueEvent::Emptied);
        removed.len()
    }

    /// Remove jobs that reached `status` (completed or failed by default)
    /// at least `grace` ago. Active jobs are never cleaned.
    pub async fn clean(
        &self,
        grace: Duration,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, JobQueueError> {
        if status == Some(JobStatus::Active) {
            return Err(JobQueueError::InvalidStatusFilter(JobStatus::Active));
        }

        let now = Utc::now();
        let mut store = self.inner.store.write().await;
        let removed = store.remove_where(|job| {
            let selected = match status {
                Some(status) => job.status == status,
                None => job.is_terminal(),
            };
            let since = job.finished_at().unwrap_or(job.created_at);
            selected
                && (now - since)
                    .to_std()
                    .map(|age| age >= grace)
                    .unwrap_or(false)
        });

        for job in &removed {
            self.inner.events.emit(QueueEvent::Removed(job.clone()));
        }
        info!(
            removed = removed.len(),
            grace_ms = grace.as_millis() as u64,
            status = ?status,
            "cleaned jobs"
        );
        Ok(removed)
    }

    /// Stop dispatching and wait for in-flight processors to settle.
    pub async fn close(&self, timeout: Duration) -> Result<(), JobQueueError> {
        self.stop().await;
        let drained = tokio::time::timeout(timeout, async {
            while self.active_workers() > 0 {
                tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
            }
        })
        .await;
        drained.map_err(|_| JobQueueError::ShutdownTimeout(self.active_workers()))
    }

    /// Subscribe to every future event.
    ///
    /// A receiver that falls more than `event_capacity` events behind observes
    /// a lag error and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Register a listener for one kind of event.
    ///
    /// Listeners run synchronously on the task that performed the transition,
    /// so they must not block. A panicking listener is logged and skipped.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, Arc::new(listener));
    }

    async fn spawn_ticker(&self) -> bool {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        tokio::spawn(run_ticker(
            Arc::downgrade(&self.inner),
            token.clone(),
            self.inner.config.tick_interval,
        ));
        *ticker = Some(token);
        true
    }

    async fn halt_ticker(&self) -> bool {
        let token = self.inner.ticker.lock().await.take();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

async fn run_ticker(queue: Weak<Inner>, shutdown: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = queue.upgrade() else {
                    break;
                };
                dispatch(&inner).await;
            }
        }
    }
    debug!("dispatch loop exited");
}

/// One tick: launch pending jobs in priority order while worker slots remain.
async fn dispatch(inner: &Arc<Inner>) {
    let max_workers = inner.config.max_workers;
    if inner.active_workers.load(Ordering::SeqCst) >= max_workers {
        return;
    }

    let processors = inner.processors.read().await;
    let mut store = inner.store.write().await;
    let mut launches = Vec::new();

    for id in store.pending_by_priority() {
        if inner.active_workers.load(Ordering::SeqCst) >= max_workers {
            break;
        }
        let Some(job) = store.get_mut(&id) else {
            continue;
        };

        match processors.get(&job.job_type) {
            Some(processor) => {
                let slot = WorkerSlot::acquire(&inner.active_workers);
                job.activate();
                debug!(
                    job_id = %id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    "job active"
                );
                let snapshot = job.clone();
                inner.events.emit(QueueEvent::Active(snapshot.clone()));
                launches.push((snapshot, Arc::clone(processor), slot));
            }
            None => {
                // No attempt is consumed: there is nothing that could be retried.
                let error = JobQueueError::MissingProcessor(job.job_type.clone());
                warn!(
                    job_id = %id,
                    job_type = %job.job_type,
                    "no processor registered, failing job"
                );
                job.fail(error.to_string());
                let snapshot = job.clone();
                inner.events.emit(QueueEvent::Failed(snapshot.clone()));
                schedule_purge(inner, &mut store, &snapshot);
            }
        }
    }

    drop(store);
    drop(processors);

    for (job, processor, slot) in launches {
        tokio::spawn(run_job(Arc::clone(inner), job, processor, slot));
    }
}

/// Run one attempt and write its outcome back into the store.
async fn run_job(
    inner: Arc<Inner>,
    job: Job,
    processor: Arc<dyn JobProcessor>,
    slot: WorkerSlot,
) {
    let id = job.id;
    let outcome = match tokio::spawn(async move { processor.process(&job).await }).await {
        Ok(outcome) => outcome,
        Err(join_error) => Err(JobQueueError::ExecutionFailed(format!(
            "processor panicked: {join_error}"
        ))),
    };

    let mut store = inner.store.write().await;
    match store.get_mut(&id) {
        Some(job) => match outcome {
            Ok(result) => {
                job.complete(result);
                info!(
                    job_id = %id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    "job completed"
                );
                let snapshot = job.clone();
                inner.events.emit(QueueEvent::Completed(snapshot.clone()));
                schedule_purge(&inner, &mut store, &snapshot);
            }
            Err(error) if job.has_attempts_left() => {
                let delay = job.options.backoff.delay_for(job.attempts);
                warn!(
                    job_id = %id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "job attempt failed, scheduling retry"
                );
                job.defer_retry(error.to_string());
                let snapshot = job.clone();
                inner.events.emit(QueueEvent::Retry(snapshot));
                schedule_promotion(&inner, &mut store, id, delay);
            }
            Err(error) => {
                warn!(
                    job_id = %id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    error = %error,
                    "job failed permanently"
                );
                job.fail(error.to_string());
                let snapshot = job.clone();
                inner.events.emit(QueueEvent::Failed(snapshot.clone()));
                schedule_purge(&inner, &mut store, &snapshot);
            }
        },
        None => warn!(job_id = %id, "settled job vanished from the store"),
    }

    // Release the slot before the store so capacity never frees up while the
    // job still reads as active.
    drop(slot);
    drop(store);
}

/// Move a delayed job back to pending once `delay` has elapsed.
fn schedule_promotion(inner: &Arc<Inner>, store: &mut JobStore, id: Uuid, delay: Duration) {
    arm_timer(inner, store, id, delay, move |inner| async move {
        let mut store = inner.store.write().await;
        store.clear_timer(&id);
        if let Some(job) = store.get_mut(&id) {
            if job.promote() {
                debug!(job_id = %id, job_type = %job.job_type, "job pending");
            }
        }
    });
}

/// Arm the retention timer of a terminal job, if its options ask for one.
fn schedule_purge(inner: &Arc<Inner>, store: &mut JobStore, job: &Job) {
    let retention = match job.status {
        JobStatus::Completed => job.options.remove_on_complete_ms,
        JobStatus::Failed => job.options.remove_on_fail_ms,
        _ => None,
    };
    let Some(retention_ms) = retention else {
        return;
    };

    let id = job.id;
    arm_timer(
        inner,
        store,
        id,
        Duration::from_millis(retention_ms),
        move |inner| async move {
            let mut store = inner.store.write().await;
            store.clear_timer(&id);
            if !store.get(&id).is_some_and(Job::is_terminal) {
                return;
            }
            if let Some(job) = store.remove(&id) {
                debug!(job_id = %id, status = %job.status, "purged job after retention period");
                inner.events.emit(QueueEvent::Removed(job));
            }
        },
    );
}

/// Spawn a timer task targeting one job and record its abort handle.
///
/// The task holds only a weak reference and does nothing once the queue is gone.
fn arm_timer<F, Fut>(
    inner: &Arc<Inner>,
    store: &mut JobStore,
    id: Uuid,
    delay: Duration,
    fire: F,
) where
    F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let queue = Arc::downgrade(inner);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = queue.upgrade() {
            fire(inner).await;
        }
    });
    store.set_timer(id, handle.abort_handle());
}
