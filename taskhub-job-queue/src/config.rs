use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_RETENTION_SECS: u64 = 300;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tuning knobs for a [`JobQueue`](crate::JobQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of jobs in `processing` at once.
    pub concurrency: usize,
    /// Default retry ceiling for submitted jobs.
    pub max_retries: u32,
    /// Safety-net interval between dispatch passes.
    pub poll_interval: Duration,
    /// How long completed and failed jobs stay queryable.
    pub retention: Duration,
    /// Buffer size of the event channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    #[inline]
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueConfig {
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }
}
