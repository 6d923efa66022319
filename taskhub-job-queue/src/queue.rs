//! Public job queue interface.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::QueueConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{JobQueueError, StorageError};
use crate::events::QueueEvent;
use crate::executor::{HandlerRegistry, JobHandler};
use crate::storage::JobStorage;
use crate::types::{EnqueueResult, Job, JobRequest, QueueStats};

/// Interface for enqueuing jobs and tracking their execution.
///
/// Cloning is cheap; clones share the same job table, handlers and
/// dispatcher. A running queue keeps its dispatch task alive until
/// [`JobQueue::stop`] is called.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Dispatcher>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", self.inner.config())
            .field("inner", &"<Arc<Dispatcher>>")
            .finish()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl JobQueue {
    /// Create an in-memory queue without persistence.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Dispatcher::new(config, None)),
        }
    }

    /// Create a queue that mirrors every job mutation to `storage`.
    pub fn with_storage(config: QueueConfig, storage: Arc<dyn JobStorage>) -> Self {
        Self {
            inner: Arc::new(Dispatcher::new(config, Some(storage))),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        self.inner.config()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        self.inner.registry()
    }

    /// Register the handler for a job type. A later registration for the
    /// same type replaces the earlier one.
    pub async fn register_handler<H: JobHandler + 'static>(
        &self,
        job_type: impl Into<String>,
        handler: H,
    ) {
        self.inner.registry().register(job_type, handler).await;
    }

    /// Enqueue a job for asynchronous processing.
    ///
    /// Jobs whose type has no handler are still accepted; they fail when
    /// dispatched unless a handler is registered by then.
    pub async fn enqueue(&self, request: JobRequest) -> Result<EnqueueResult, JobQueueError> {
        self.inner.enqueue(request).await
    }

    /// Start dispatching. Persisted jobs are recovered first. Calling this
    /// on a running queue does nothing.
    pub async fn start(&self) {
        self.inner.start().await;
    }

    /// Stop dispatching and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner.is_running().await
    }

    /// Get a job by id. Finished jobs are only kept for the retention window.
    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.inner.get_job(id).await
    }

    /// All tracked jobs in submission order.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.inner.list_jobs().await
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.stats().await
    }

    /// Drop every completed and failed job from memory. Returns how many
    /// were removed.
    pub async fn clear_finished_jobs(&self) -> usize {
        self.inner.clear_finished_jobs().await
    }

    /// Load persisted jobs into memory without starting dispatch.
    ///
    /// `start` does this automatically. Returns the number of jobs loaded.
    pub async fn load_persisted(&self) -> usize {
        self.inner.load_persisted().await
    }

    /// Jobs that exhausted their retries, read from the dead-letter store.
    pub async fn dead_letters(&self) -> Result<Vec<Job>, StorageError> {
        self.inner.dead_letters().await
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events().subscribe()
    }
}
