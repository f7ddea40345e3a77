//! Authoritative in-memory table of jobs.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::types::{Job, JobStatus, QueueStats};

/// Internal storage optimized for both iteration and lookup by ID.
#[derive(Debug, Default)]
pub(crate) struct JobStore {
    /// Ordered list of job IDs (oldest first).
    order: VecDeque<Uuid>,
    /// Map from ID to job for O(1) lookup.
    jobs: HashMap<Uuid, Job>,
    /// Pending delay, retry or purge timer per job. At most one at a time.
    timers: HashMap<Uuid, AbortHandle>,
}

impl JobStore {
    pub(crate) fn insert(&mut self, job: Job) {
        let id = job.id;
        self.jobs.insert(id, job);
        self.order.push_back(id);
    }

    #[inline]
    pub(crate) fn get(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: &Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Drop a job and abort whatever timer still targets it.
    pub(crate) fn remove(&mut self, id: &Uuid) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.order.retain(|other| other != id);
        if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }
        Some(job)
    }

    /// Remove every job matching `predicate`, oldest first.
    ///
    /// The creation order is compacted in a single pass.
    pub(crate) fn remove_where(&mut self, mut predicate: impl FnMut(&Job) -> bool) -> Vec<Job> {
        let doomed: Vec<Uuid> = self
            .iter()
            .filter(|&job| predicate(job))
            .map(|job| job.id)
            .collect();
        if doomed.is_empty() {
            return Vec::new();
        }

        let doomed_set: HashSet<Uuid> = doomed.iter().copied().collect();
        self.order.retain(|id| !doomed_set.contains(id));
        doomed
            .iter()
            .filter_map(|id| {
                if let Some(timer) = self.timers.remove(id) {
                    timer.abort();
                }
                self.jobs.remove(id)
            })
            .collect()
    }

    /// Iterate over all jobs in creation order.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    /// Pending job IDs, highest priority first, creation order within a priority.
    pub(crate) fn pending_by_priority(&self) -> Vec<Uuid> {
        let mut pending: Vec<&Job> = self
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .collect();
        // Stable sort keeps creation order for equal priorities.
        pending.sort_by_key(|job| Reverse(job.options.priority));
        pending.into_iter().map(|job| job.id).collect()
    }

    pub(crate) fn count(&self, status: Option<JobStatus>) -> usize {
        match status {
            Some(status) => self.jobs.values().filter(|j| j.status == status).count(),
            None => self.jobs.len(),
        }
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.values() {
            stats.record(job.status);
        }
        stats
    }

    /// Attach a timer to a job, aborting the one it replaces.
    pub(crate) fn set_timer(&mut self, id: Uuid, timer: AbortHandle) {
        if let Some(previous) = self.timers.insert(id, timer) {
            previous.abort();
        }
    }

    /// Forget a job's timer without aborting it; used by the timer itself once it fires.
    pub(crate) fn clear_timer(&mut self, id: &Uuid) {
        self.timers.remove(id);
    }

    /// Abort and forget a job's timer.
    pub(crate) fn cancel_timer(&mut self, id: &Uuid) {
        if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }
    }
}
