//! In-process background job queue.
//!
//! Jobs are typed units of work. The queue runs at most a configured number
//! of them at once, picks the highest priority pending job first (FIFO within
//! a priority), retries failures up to a limit and moves jobs that keep
//! failing to a dead-letter store. With a [`JobStorage`] attached, every
//! mutation is mirrored so pending work survives a restart; jobs that were
//! mid-flight when the process died run again (at-least-once).
//!
//! # Architecture
//!
//! - [`JobQueue`] - The main interface for enqueuing and tracking jobs
//! - [`JobHandler`] - Trait for implementing job handlers
//! - [`Job`] - A job record and its lifecycle state
//! - [`JobRequest`] - A request to enqueue a job
//! - [`JobStorage`] - Persistence adapter ([`MemoryStorage`], [`FileStorage`])
//! - [`QueueEvent`] - Notifications published to subscribers
//!
//! # Example
//!
//! ```rust,no_run
//! use taskhub_job_queue::{async_trait, Job, JobHandler, JobQueue, JobQueueError, JobRequest, QueueConfig};
//! use serde_json::json;
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl JobHandler for SendEmail {
//!     async fn handle(&self, job: &Job) -> Result<(), JobQueueError> {
//!         println!("sending email: {}", job.payload);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = JobQueue::new(QueueConfig::default().with_concurrency(2));
//!     queue.register_handler("email", SendEmail).await;
//!     queue.start().await;
//!
//!     let request = JobRequest::new("email", json!({"to": "a@x.com"})).with_priority(10);
//!     let result = queue.enqueue(request).await.unwrap();
//!     println!("Enqueued job: {}", result.job_id);
//!
//!     queue.stop().await;
//! }
//! ```

mod config;
mod dispatcher;
mod error;
mod events;
mod executor;
mod queue;
mod storage;
mod types;

pub use config::{QueueConfig, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
pub use error::{JobQueueError, StorageError};
pub use events::{EventBus, QueueEvent};
pub use executor::{handler_fn, HandlerFn, HandlerRegistry, JobHandler, NoOpHandler};
pub use queue::JobQueue;
pub use storage::{FileStorage, JobStorage, MemoryStorage};
pub use types::{
    EnqueueResult, Job, JobRequest, JobStatus, QueueStats, FAILED_KEY_PREFIX, QUEUE_KEY_PREFIX,
};

// Re-export async_trait for convenience when implementing JobHandler
pub use async_trait::async_trait;
