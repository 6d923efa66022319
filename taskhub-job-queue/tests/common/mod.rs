#![allow(dead_code)]

use std::time::Duration;

use taskhub_job_queue::{QueueConfig, QueueEvent};
use tokio::sync::broadcast::{error::RecvError, Receiver};

pub const WAIT: Duration = Duration::from_secs(5);

/// Queue settings with a short poll interval so tests never wait long.
pub fn fast_config() -> QueueConfig {
    QueueConfig::default().with_poll_interval(Duration::from_millis(20))
}

/// Receive events until one matches, failing the test after [`WAIT`].
pub async fn wait_for<F>(rx: &mut Receiver<QueueEvent>, mut predicate: F) -> QueueEvent
where
    F: FnMut(&QueueEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for queue event")
}

/// Wait until the event for a specific job and name arrives.
pub async fn wait_for_job(rx: &mut Receiver<QueueEvent>, job_id: &str, name: &str) -> QueueEvent {
    wait_for(rx, |event| {
        event.name() == name && event.job().map(|j| j.id.as_str()) == Some(job_id)
    })
    .await
}
