//! Job selection, concurrency bounding and the retry/dead-letter policy.
//!
//! A single dispatch task performs every selection pass, so the active-slot
//! counter and the chosen pending job are always consistent when a job is
//! claimed. Handlers run as separate tasks; when one finishes it records the
//! outcome and wakes the dispatch task so the freed slot is reused at once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{JobQueueError, StorageError};
use crate::events::{EventBus, QueueEvent};
use crate::executor::{HandlerRegistry, JobHandler};
use crate::storage::JobStorage;
use crate::types::{
    EnqueueResult, Job, JobRequest, JobStatus, QueueStats, FAILED_KEY_PREFIX, QUEUE_KEY_PREFIX,
};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// In-memory job table, ordered by submission.
#[derive(Debug, Default)]
struct QueueState {
    /// Job ids in submission order (oldest first).
    order: VecDeque<String>,
    /// Map from id to job for O(1) lookup.
    jobs: HashMap<String, Job>,
    /// Number of claimed slots.
    active: usize,
}

impl QueueState {
    fn insert(&mut self, job: Job) {
        let id = job.id.clone();
        if self.jobs.insert(id.clone(), job).is_none() {
            self.order.push_back(id);
        }
    }

    #[inline]
    fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    #[inline]
    fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    #[inline]
    fn get_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Iterate over all jobs in submission order.
    fn iter(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    /// Highest priority pending job; ties go to the earliest `created_at`,
    /// then to the earliest submission.
    fn next_pending(&self) -> Option<String> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(idx, id)| {
                self.jobs
                    .get(id)
                    .filter(|job| job.status == JobStatus::Pending)
                    .map(|job| (idx, job))
            })
            .max_by(|(ia, a), (ib, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(_, job)| job.id.clone())
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.jobs.values() {
            stats.record(job.status);
        }
        stats
    }

    /// Remove terminal jobs matching `predicate`, returning them.
    fn remove_finished<F>(&mut self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let ids: Vec<String> = self
            .jobs
            .values()
            .filter(|job| job.status.is_terminal() && predicate(job))
            .map(|job| job.id.clone())
            .collect();
        if ids.is_empty() {
            return Vec::new();
        }

        let removed: Vec<Job> = ids.iter().filter_map(|id| self.jobs.remove(id)).collect();
        self.order.retain(|id| self.jobs.contains_key(id));
        removed
    }
}

/// Handle to the running dispatch task.
struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the job table and drives every state transition.
pub(crate) struct Dispatcher {
    config: QueueConfig,
    state: RwLock<QueueState>,
    registry: HandlerRegistry,
    storage: Option<Arc<dyn JobStorage>>,
    events: EventBus,
    wake: Notify,
    tracker: TaskTracker,
    lifecycle: Mutex<Option<Running>>,
}

impl Dispatcher {
    pub(crate) fn new(config: QueueConfig, storage: Option<Arc<dyn JobStorage>>) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            state: RwLock::new(QueueState::default()),
            registry: HandlerRegistry::new(),
            storage,
            events,
            wake: Notify::new(),
            tracker: TaskTracker::new(),
            lifecycle: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[inline]
    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    #[inline]
    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    pub(crate) async fn enqueue(&self, request: JobRequest) -> Result<EnqueueResult, JobQueueError> {
        if request.job_type.trim().is_empty() {
            return Err(JobQueueError::InvalidRequest(
                "job type must not be empty".to_owned(),
            ));
        }

        let max_retries = request.max_retries.unwrap_or(self.config.max_retries);
        let job = Job::new(request.job_type, request.payload, request.priority, max_retries);
        let job_id = job.id.clone();

        {
            let mut state = self.state.write().await;
            state.insert(job.clone());
            self.persist(&job).await;
        }

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            "job added"
        );
        self.events.publish(QueueEvent::JobAdded(job));
        self.wake.notify_one();

        Ok(EnqueueResult { job_id })
    }

    pub(crate) async fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("job queue already running");
            return;
        }

        if self.storage.is_some() {
            let loaded = self.load_persisted().await;
            info!(loaded, "recovered persisted jobs");
        }

        let shutdown = CancellationToken::new();
        self.tracker.reopen();
        let handle = tokio::spawn(Arc::clone(self).run(shutdown.clone()));
        *lifecycle = Some(Running { shutdown, handle });

        info!(
            concurrency = self.concurrency(),
            max_retries = self.config.max_retries,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "job queue started"
        );
        self.events.publish(QueueEvent::QueueStarted);
    }

    pub(crate) async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            debug!("job queue already stopped");
            return;
        };

        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            error!(error = %e, "dispatch task terminated abnormally");
        }

        let in_flight = self.state.read().await.active;
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight jobs to finish");
        }
        self.tracker.close();
        self.tracker.wait().await;

        info!("job queue stopped");
        self.events.publish(QueueEvent::QueueStopped);
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_some()
    }

    pub(crate) async fn get_job(&self, id: &str) -> Option<Job> {
        self.state.read().await.get(id).cloned()
    }

    pub(crate) async fn list_jobs(&self) -> Vec<Job> {
        self.state.read().await.iter().cloned().collect()
    }

    pub(crate) async fn stats(&self) -> QueueStats {
        self.state.read().await.stats()
    }

    pub(crate) async fn clear_finished_jobs(&self) -> usize {
        let removed = self.state.write().await.remove_finished(|_| true);
        self.forget(&removed).await;
        if !removed.is_empty() {
            info!(count = removed.len(), "cleared finished jobs");
        }
        removed.len()
    }

    /// Load `queue_*` records from storage into memory.
    ///
    /// Jobs already known in memory are left untouched. A record persisted as
    /// `processing` belongs to a run that never finished, so it goes back to
    /// `pending` and will execute again.
    pub(crate) async fn load_persisted(&self) -> usize {
        let Some(storage) = &self.storage else {
            return 0;
        };

        let keys = match storage.list(QUEUE_KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "failed to list persisted jobs");
                return 0;
            }
        };

        let mut loaded = Vec::with_capacity(keys.len());
        for key in keys {
            match storage.read(&key).await {
                Ok(Some(job)) => loaded.push(job),
                Ok(None) => {}
                Err(e) => error!(key = %key, error = %e, "failed to read persisted job"),
            }
        }
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut state = self.state.write().await;
        let mut count = 0;
        for mut job in loaded {
            if state.contains(&job.id) {
                continue;
            }
            if job.status == JobStatus::Processing {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    "job was interrupted while processing, re-queueing"
                );
                job.requeue();
                self.persist(&job).await;
            }
            state.insert(job);
            count += 1;
        }
        count
    }

    pub(crate) async fn dead_letters(&self) -> Result<Vec<Job>, StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(Vec::new());
        };

        let mut jobs = Vec::new();
        for key in storage.list(FAILED_KEY_PREFIX).await? {
            if let Some(job) = storage.read(&key).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Dispatch loop: wakes on submissions, completions and the poll tick.
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                // Ahead of `wake` so a busy queue still purges.
                _ = ticker.tick() => self.purge_expired().await,
                _ = self.wake.notified() => {}
            }
            self.dispatch_ready(&shutdown).await;
        }
        debug!("dispatch loop exited");
    }

    /// Claim pending jobs until the ceiling is reached or none are left.
    async fn dispatch_ready(self: &Arc<Self>, shutdown: &CancellationToken) {
        while !shutdown.is_cancelled() {
            let job = {
                let mut state = self.state.write().await;
                if state.active >= self.concurrency() {
                    return;
                }
                let Some(id) = state.next_pending() else {
                    return;
                };
                let Some(job) = state.get_mut(&id) else {
                    return;
                };
                job.start();
                let claimed = job.clone();
                state.active += 1;
                self.persist(&claimed).await;
                claimed
            };

            info!(
                job_id = %job.id,
                job_type = %job.job_type,
                priority = job.priority,
                retries = job.retries,
                "job started"
            );
            self.events.publish(QueueEvent::JobStarted(job.clone()));

            match self.registry.lookup(&job.job_type).await {
                Some(handler) => self.spawn_handler(handler, job),
                None => {
                    let err = JobQueueError::UnregisteredHandler(job.job_type.clone());
                    self.finish(&job.id, Err(err)).await;
                }
            }
        }
    }

    fn spawn_handler(self: &Arc<Self>, handler: Arc<dyn JobHandler>, job: Job) {
        let dispatcher = Arc::clone(self);
        self.tracker.spawn(async move {
            let id = job.id.clone();
            // Run the handler in its own task so a panic is reported as a
            // failed attempt instead of leaking the slot.
            let outcome = match tokio::spawn(async move { handler.handle(&job).await }).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(JobQueueError::execution("handler panicked")),
                Err(_) => Err(JobQueueError::execution("handler task was cancelled")),
            };
            dispatcher.finish(&id, outcome).await;
            dispatcher.wake.notify_one();
        });
    }

    /// Release a slot and apply the outcome of an attempt.
    async fn finish(&self, id: &str, outcome: Result<(), JobQueueError>) {
        let event = {
            let mut state = self.state.write().await;
            state.active = state.active.saturating_sub(1);
            let Some(job) = state.get_mut(id) else {
                warn!(job_id = %id, "finished job is no longer tracked");
                return;
            };

            let event = match outcome {
                Ok(()) => {
                    job.complete();
                    info!(job_id = %job.id, job_type = %job.job_type, "job completed");
                    QueueEvent::JobCompleted(job.clone())
                }
                Err(err @ JobQueueError::UnregisteredHandler(_)) => {
                    let message = err.to_string();
                    job.fail(message.clone());
                    error!(job_id = %job.id, job_type = %job.job_type, "{}", message);
                    QueueEvent::JobFailed {
                        job: job.clone(),
                        error: message,
                    }
                }
                Err(err) => {
                    let message = failure_message(err);
                    if job.record_failure(message.clone()) {
                        warn!(
                            job_id = %job.id,
                            job_type = %job.job_type,
                            retries = job.retries,
                            max_retries = job.max_retries,
                            error = %message,
                            "job failed, will retry"
                        );
                        QueueEvent::JobRetry {
                            job: job.clone(),
                            error: message,
                        }
                    } else {
                        error!(
                            job_id = %job.id,
                            job_type = %job.job_type,
                            retries = job.retries,
                            error = %message,
                            "job failed permanently"
                        );
                        QueueEvent::JobFailed {
                            job: job.clone(),
                            error: message,
                        }
                    }
                }
            };

            let snapshot = job.clone();
            if snapshot.status == JobStatus::Failed {
                self.dead_letter(&snapshot).await;
            } else {
                self.persist(&snapshot).await;
            }
            event
        };

        self.events.publish(event);
    }

    /// Drop terminal jobs older than the retention window.
    async fn purge_expired(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.config.retention) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };

        let removed = self
            .state
            .write()
            .await
            .remove_finished(|job| job.updated_at <= cutoff);
        if !removed.is_empty() {
            debug!(count = removed.len(), "purged expired jobs");
            self.forget(&removed).await;
        }
    }

    /// Remove the active records of purged completed jobs.
    async fn forget(&self, removed: &[Job]) {
        let Some(storage) = &self.storage else {
            return;
        };
        for job in removed.iter().filter(|j| j.status == JobStatus::Completed) {
            if let Err(e) = storage.delete(&job.queue_key()).await {
                error!(job_id = %job.id, error = %e, "failed to delete persisted job");
            }
        }
    }

    /// Mirror a job to its active-queue key. Failures are logged only.
    async fn persist(&self, job: &Job) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = storage.save(&job.queue_key(), job).await {
            error!(job_id = %job.id, error = %e, "failed to persist job");
        }
    }

    /// Move a failed job to the dead-letter store.
    async fn dead_letter(&self, job: &Job) {
        let Some(storage) = &self.storage else {
            return;
        };
        let key = job.dead_letter_key();
        if let Err(e) = storage.save(&key, job).await {
            // Keep the failed record under its active key rather than lose it.
            error!(job_id = %job.id, error = %e, "failed to write dead-letter record");
            self.persist(job).await;
            return;
        }
        if let Err(e) = storage.delete(&job.queue_key()).await {
            error!(job_id = %job.id, error = %e, "failed to delete active record of failed job");
        }
        debug!(job_id = %job.id, key = %key, "job moved to dead-letter store");
    }
}

fn failure_message(err: JobQueueError) -> String {
    match err {
        JobQueueError::ExecutionFailed(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;

    fn pending(job_type: &str, priority: i32) -> Job {
        Job::new(job_type, Value::Null, priority, 3)
    }

    #[test]
    fn test_next_pending_prefers_priority() {
        let mut state = QueueState::default();
        let low = pending("low", 5);
        let high = pending("high", 10);
        state.insert(low);
        state.insert(high.clone());
        assert_eq!(state.next_pending(), Some(high.id));
    }

    #[test]
    fn test_next_pending_is_fifo_within_priority() {
        let mut state = QueueState::default();
        let mut first = pending("a", 1);
        let mut second = pending("b", 1);
        let now = Utc::now();
        first.created_at = now;
        second.created_at = now + ChronoDuration::milliseconds(5);
        // Submission order is reversed; created_at decides.
        state.insert(second);
        state.insert(first.clone());
        assert_eq!(state.next_pending(), Some(first.id));
    }

    #[test]
    fn test_next_pending_uses_submission_order_on_equal_timestamps() {
        let mut state = QueueState::default();
        let first = pending("a", 1);
        let mut second = pending("b", 1);
        second.created_at = first.created_at;
        state.insert(first.clone());
        state.insert(second);
        assert_eq!(state.next_pending(), Some(first.id));
    }

    #[test]
    fn test_next_pending_skips_non_pending() {
        let mut state = QueueState::default();
        let mut busy = pending("busy", 100);
        busy.start();
        let idle = pending("idle", 0);
        state.insert(busy);
        state.insert(idle.clone());
        assert_eq!(state.next_pending(), Some(idle.id));

        let mut empty = QueueState::default();
        let mut done = pending("done", 0);
        done.complete();
        empty.insert(done);
        assert_eq!(empty.next_pending(), None);
    }

    #[test]
    fn test_remove_finished_keeps_live_jobs() {
        let mut state = QueueState::default();
        let live = pending("live", 0);
        let mut done = pending("done", 0);
        done.complete();
        let mut dead = pending("dead", 0);
        dead.fail("nope");
        state.insert(live.clone());
        state.insert(done);
        state.insert(dead);

        let removed = state.remove_finished(|_| true);
        assert_eq!(removed.len(), 2);
        assert_eq!(state.order.len(), 1);
        assert!(state.contains(&live.id));
        assert_eq!(state.stats().total, 1);
    }

    #[test]
    fn test_failure_message_unwraps_execution_error() {
        assert_eq!(failure_message(JobQueueError::execution("smtp down")), "smtp down");
        assert_eq!(
            failure_message(JobQueueError::InvalidRequest("x".into())),
            "invalid job request: x"
        );
    }
}
