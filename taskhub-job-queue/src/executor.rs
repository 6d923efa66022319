//! Job handler trait and the registry mapping job types to handlers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::JobQueueError;
use crate::types::Job;

/// Trait for implementing job handlers.
///
/// Each job type has at most one handler. The handler receives the full job
/// record and reports success or a failed attempt; the dispatcher decides
/// whether a failure is retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job.
    ///
    /// Returns `Ok(())` on success, or an error describing the failure.
    async fn handle(&self, job: &Job) -> Result<(), JobQueueError>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a handler.
///
/// ```rust,no_run
/// use taskhub_job_queue::{handler_fn, Job, JobQueueError};
///
/// let handler = handler_fn(|job: Job| async move {
///     println!("sending {}", job.payload);
///     Ok::<(), JobQueueError>(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobQueueError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobQueueError>> + Send,
{
    async fn handle(&self, job: &Job) -> Result<(), JobQueueError> {
        (self.f)(job.clone()).await
    }
}

/// A no-op handler that immediately completes jobs.
///
/// This is useful for testing or as a placeholder when the actual job
/// implementation isn't ready yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    async fn handle(&self, _job: &Job) -> Result<(), JobQueueError> {
        Ok(())
    }
}

/// Maps job types to the handler that executes them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &"<RwLock<HashMap<String, Arc<dyn JobHandler>>>>")
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for the same type.
    pub async fn register<H: JobHandler + 'static>(&self, job_type: impl Into<String>, handler: H) {
        let job_type = job_type.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(job_type.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(job_type = %job_type, "replaced existing job handler");
        }
    }

    /// Find the handler for a job type.
    pub async fn lookup(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        let handlers = self.handlers.read().await;
        handlers.get(job_type).cloned()
    }

    /// Registered job types, sorted.
    pub async fn job_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut types: Vec<String> = handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
