//! Core types for the job queue system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Length of the random suffix appended to generated job ids.
const ID_SUFFIX_LEN: usize = 9;

/// A request to enqueue a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_type: String,
    pub payload: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobRequest {
    #[inline]
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: 0,
            max_retries: None,
        }
    }

    /// Higher priorities are dispatched first.
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Override the queue-wide retry ceiling for this job only.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResult {
    pub job_id: String,
}

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// A unit of work and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Value,
    pub status: JobStatus,
    pub priority: i32,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a new pending job with a freshly generated id.
    pub fn new(job_type: impl Into<String>, payload: Value, priority: i32, max_retries: u32) -> Self {
        let job_type = job_type.into();
        let now = Utc::now();
        Self {
            id: generate_job_id(&job_type, now),
            job_type,
            payload,
            status: JobStatus::Pending,
            priority,
            retries: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            processed_at: None,
            error: None,
        }
    }

    /// Mark the job as claimed by a worker slot.
    #[inline]
    pub fn start(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.processed_at = Some(now);
        self.updated_at = now;
    }

    /// Mark the job as completed.
    #[inline]
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Record a failed attempt.
    ///
    /// The job goes back to `pending` while retries remain, otherwise it is
    /// failed for good. Returns true when the job will be retried.
    pub fn record_failure(&mut self, message: impl Into<String>) -> bool {
        self.error = Some(message.into());
        self.updated_at = Utc::now();
        if self.retries < self.max_retries {
            self.retries += 1;
            self.status = JobStatus::Pending;
            true
        } else {
            self.status = JobStatus::Failed;
            false
        }
    }

    /// Put a job that was interrupted mid-flight back in the pending pool.
    #[inline]
    pub fn requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.updated_at = Utc::now();
    }

    /// Fail the job without consuming a retry.
    #[inline]
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(message.into());
    }

    /// Storage key of the active record.
    #[inline]
    pub fn queue_key(&self) -> String {
        format!("{}{}", QUEUE_KEY_PREFIX, self.id)
    }

    /// Storage key of the dead-letter record.
    #[inline]
    pub fn dead_letter_key(&self) -> String {
        format!(
            "{}{}_{}",
            FAILED_KEY_PREFIX,
            self.id,
            self.updated_at.timestamp_millis()
        )
    }
}

/// Prefix of active-queue storage keys.
pub const QUEUE_KEY_PREFIX: &str = "queue_";

/// Prefix of dead-letter storage keys.
pub const FAILED_KEY_PREFIX: &str = "failed_";

/// Job types are caller-supplied; the id only keeps `[A-Za-z0-9_-]` so it is
/// usable as a storage key and file name.
fn id_safe_type(job_type: &str) -> String {
    job_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn generate_job_id(job_type: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        id_safe_type(job_type),
        now.timestamp_millis(),
        &suffix[..ID_SUFFIX_LEN]
    )
}

/// Snapshot of job counts partitioned by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Count one job of the given status.
    #[inline]
    pub fn record(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}
