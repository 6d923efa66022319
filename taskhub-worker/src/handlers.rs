//! Built-in job handlers shipped with the worker.

use std::time::Duration;

use serde_json::Value;
use taskhub_job_queue::{async_trait, Job, JobHandler, JobQueue, JobQueueError, NoOpHandler};
use tracing::info;

pub const NOOP: &str = "noop";
pub const LOG: &str = "log";
pub const SLEEP: &str = "sleep";

/// Upper bound for a single `sleep` job.
const MAX_SLEEP_MS: u64 = 60 * 60 * 1000;

/// Register every built-in handler on `queue`.
pub async fn register_builtin_handlers(queue: &JobQueue) {
    queue.register_handler(NOOP, NoOpHandler).await;
    queue.register_handler(LOG, LogHandler).await;
    queue.register_handler(SLEEP, SleepHandler).await;
}

/// Writes the payload to the log.
///
/// Object payloads are logged by their top-level keys; a `message` field,
/// when present, is logged as-is.
#[derive(Debug, Default)]
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobQueueError> {
        let message = job.payload.get("message").and_then(Value::as_str);
        info!(
            job_id = %job.id,
            attempt = job.retries + 1,
            keys = ?payload_keys(&job.payload),
            message = message.unwrap_or("-"),
            "log job"
        );
        Ok(())
    }
}

/// Top-level keys of an object payload, sorted.
fn payload_keys(payload: &Value) -> Vec<String> {
    let mut keys: Vec<String> = payload
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}

/// Sleeps for `payload.ms` milliseconds (or a bare number payload).
#[derive(Debug, Default)]
pub struct SleepHandler;

impl SleepHandler {
    fn duration(payload: &Value) -> Result<Duration, JobQueueError> {
        let ms = payload
            .get("ms")
            .unwrap_or(payload)
            .as_u64()
            .ok_or_else(|| JobQueueError::execution("sleep payload needs a non-negative `ms`"))?;
        if ms > MAX_SLEEP_MS {
            return Err(JobQueueError::execution(format!(
                "sleep of {ms}ms exceeds the {MAX_SLEEP_MS}ms limit"
            )));
        }
        Ok(Duration::from_millis(ms))
    }
}

#[async_trait]
impl JobHandler for SleepHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobQueueError> {
        let duration = Self::duration(&job.payload)?;
        tokio::time::sleep(duration).await;
        info!(
            job_id = %job.id,
            slept_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "sleep job finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_keys() {
        let keys = payload_keys(&json!({"b": 1, "a": {"nested": true}}));
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(payload_keys(&json!("plain")).is_empty());
    }

    #[tokio::test]
    async fn test_log_handler_accepts_any_payload() {
        let job = Job::new(LOG, json!({"message": "hello"}), 0, 0);
        assert!(LogHandler.handle(&job).await.is_ok());

        let job = Job::new(LOG, json!([1, 2, 3]), 0, 0);
        assert!(LogHandler.handle(&job).await.is_ok());
    }

    #[test]
    fn test_sleep_duration() {
        assert_eq!(
            SleepHandler::duration(&json!({"ms": 25})).unwrap(),
            Duration::from_millis(25)
        );
        assert_eq!(
            SleepHandler::duration(&json!(10)).unwrap(),
            Duration::from_millis(10)
        );
        assert!(SleepHandler::duration(&json!({"ms": -1})).is_err());
        assert!(SleepHandler::duration(&json!({})).is_err());
        assert!(SleepHandler::duration(&json!({"ms": MAX_SLEEP_MS + 1})).is_err());
    }

    #[tokio::test]
    async fn test_sleep_handler_completes() {
        let job = Job::new(SLEEP, json!({"ms": 1}), 0, 0);
        assert!(SleepHandler.handle(&job).await.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_handler_rejects_bad_payload() {
        let job = Job::new(SLEEP, json!({"ms": "soon"}), 0, 0);
        let err = SleepHandler.handle(&job).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "job execution failed: sleep payload needs a non-negative `ms`"
        );
    }

    #[tokio::test]
    async fn test_builtin_handlers_are_registered() {
        let queue = JobQueue::default();
        register_builtin_handlers(&queue).await;

        let types = queue.registry().job_types().await;
        assert_eq!(types, vec![LOG, NOOP, SLEEP]);
    }
}
