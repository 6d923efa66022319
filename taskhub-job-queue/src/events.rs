//! Notifications published by the queue.

use tokio::sync::broadcast;

use crate::types::Job;

/// Events emitted as jobs move through their lifecycle.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    JobAdded(Job),
    JobStarted(Job),
    JobCompleted(Job),
    JobRetry { job: Job, error: String },
    JobFailed { job: Job, error: String },
    QueueStarted,
    QueueStopped,
}

impl QueueEvent {
    /// Stable event name, e.g. `job:added`.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JobAdded(_) => "job:added",
            Self::JobStarted(_) => "job:started",
            Self::JobCompleted(_) => "job:completed",
            Self::JobRetry { .. } => "job:retry",
            Self::JobFailed { .. } => "job:failed",
            Self::QueueStarted => "queue:started",
            Self::QueueStopped => "queue:stopped",
        }
    }

    /// The job this event is about, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::JobAdded(job)
            | Self::JobStarted(job)
            | Self::JobCompleted(job)
            | Self::JobRetry { job, .. }
            | Self::JobFailed { job, .. } => Some(job),
            Self::QueueStarted | Self::QueueStopped => None,
        }
    }
}

/// Fan-out of queue events to any number of subscribers.
///
/// Publishing never blocks; a subscriber that falls more than the channel
/// capacity behind observes `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: QueueEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}
