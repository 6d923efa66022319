use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use taskhub_job_queue::{FileStorage, JobQueue, QueueConfig};

/// Load configuration from file and environment, then validate it.
pub fn load_validated_config(path: Option<&Path>) -> anyhow::Result<taskhub_config::Config> {
    let config = taskhub_config::load_config(path).context("failed to load configuration")?;
    taskhub_config::validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

/// Build queue tuning from application config.
pub fn queue_config_from_config(cfg: &taskhub_config::Config) -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(cfg.queue.concurrency)
        .with_max_retries(cfg.queue.max_retries)
        .with_poll_interval(Duration::from_millis(cfg.queue.poll_interval_ms))
        .with_retention(Duration::from_secs(cfg.queue.retention_secs))
        .with_event_capacity(cfg.queue.event_capacity)
}

/// Open the configured file storage, or `None` when persistence is disabled.
pub async fn storage_from_config(
    cfg: &taskhub_config::StorageConfig,
) -> anyhow::Result<Option<FileStorage>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let storage = FileStorage::open(&cfg.directory)
        .await
        .with_context(|| format!("failed to open job storage at {}", cfg.directory))?;
    Ok(Some(storage))
}

/// Build the queue described by `cfg`, persistent when storage is enabled.
pub async fn queue_from_config(cfg: &taskhub_config::Config) -> anyhow::Result<JobQueue> {
    let queue_cfg = queue_config_from_config(cfg);
    match storage_from_config(&cfg.storage).await? {
        Some(storage) => {
            tracing::info!(directory = %cfg.storage.directory, "job persistence enabled");
            Ok(JobQueue::with_storage(queue_cfg, Arc::new(storage)))
        }
        None => {
            tracing::info!("job persistence disabled; jobs are lost on exit");
            Ok(JobQueue::new(queue_cfg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let f = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tmpfile");
        std::fs::write(f.path(), contents).unwrap();
        f
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let f = write_config("[queue]\nconcurrency = 0\n");
        let err = load_validated_config(Some(f.path())).unwrap_err();
        assert!(format!("{err:#}").contains("queue.concurrency must be > 0"));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let f = write_config("[logging]\nlevel = \"loud\"\n");
        let err = load_validated_config(Some(f.path())).unwrap_err();
        assert!(format!("{err:#}").contains("invalid logging.level"));
    }

    #[test]
    fn test_valid_config_loads() {
        let f = write_config("[queue]\nconcurrency = 4\npoll_interval_ms = 100\n");
        let cfg = load_validated_config(Some(f.path())).unwrap();
        assert_eq!(cfg.queue.concurrency, 4);
        assert_eq!(cfg.queue.poll_interval_ms, 100);
    }

    #[test]
    fn test_queue_config_from_config() {
        let mut cfg = taskhub_config::Config::default();
        cfg.queue.concurrency = 8;
        cfg.queue.max_retries = 1;
        cfg.queue.poll_interval_ms = 250;
        cfg.queue.retention_secs = 60;
        cfg.queue.event_capacity = 16;

        let queue_cfg = queue_config_from_config(&cfg);
        assert_eq!(queue_cfg.concurrency, 8);
        assert_eq!(queue_cfg.max_retries, 1);
        assert_eq!(queue_cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(queue_cfg.retention, Duration::from_secs(60));
        assert_eq!(queue_cfg.event_capacity, 16);
    }

    #[tokio::test]
    async fn test_disabled_storage_yields_none() {
        let cfg = taskhub_config::StorageConfig {
            enabled: false,
            directory: String::new(),
        };
        assert!(storage_from_config(&cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enabled_storage_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs");
        let cfg = taskhub_config::StorageConfig {
            enabled: true,
            directory: path.to_string_lossy().into_owned(),
        };
        let storage = storage_from_config(&cfg).await.unwrap().unwrap();
        assert_eq!(storage.root(), path.as_path());
        assert!(path.is_dir());
    }
}
