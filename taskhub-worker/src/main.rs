//! TaskHub Worker
//!
//! Entry point for the taskhub-worker binary: loads configuration, installs
//! tracing and runs or inspects the job queue.

use anyhow::{bail, Context};
use clap::Parser;
use taskhub_job_queue::{JobRequest, JobStorage, QueueEvent, QueueStats, QUEUE_KEY_PREFIX};
use tokio::sync::broadcast::{self, error::RecvError};

mod cli;
mod config_helpers;
mod handlers;
mod tracing_setup;

use cli::{Cli, Command};
use config_helpers::{load_validated_config, queue_from_config, storage_from_config};
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_validated_config(cli.config.as_deref())?;
    install_tracing_from_config(&config.logging);

    tracing::debug!(
        config_path = ?cli.config,
        concurrency = config.queue.concurrency,
        max_retries = config.queue.max_retries,
        storage_enabled = config.storage.enabled,
        "configuration loaded"
    );

    match cli.command {
        Command::Run => run(&config).await,
        Command::Submit {
            job_type,
            payload,
            priority,
            max_retries,
        } => submit(&config, job_type, &payload, priority, max_retries).await,
        Command::Stats => stats(&config).await,
        Command::DeadLetters => dead_letters(&config).await,
    }
}

/// Process jobs until ctrl-c, then drain in-flight work.
async fn run(config: &taskhub_config::Config) -> anyhow::Result<()> {
    let queue = queue_from_config(config).await?;
    handlers::register_builtin_handlers(&queue).await;

    let events = tokio::spawn(log_events(queue.subscribe()));

    queue.start().await;
    tracing::info!(
        concurrency = queue.config().concurrency,
        handlers = ?queue.registry().job_types().await,
        "worker running; press ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutdown requested, waiting for in-flight jobs");
    queue.stop().await;
    events.abort();

    let stats = queue.stats().await;
    tracing::info!(
        pending = stats.pending,
        completed = stats.completed,
        failed = stats.failed,
        "worker stopped"
    );
    Ok(())
}

/// Log failure notifications; the dispatcher already logs the rest.
async fn log_events(mut rx: broadcast::Receiver<QueueEvent>) {
    loop {
        match rx.recv().await {
            Ok(QueueEvent::JobFailed { job, error }) => {
                tracing::warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    retries = job.retries,
                    %error,
                    "job moved to dead letters"
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Persist a job for the next `run` without dispatching it.
async fn submit(
    config: &taskhub_config::Config,
    job_type: String,
    payload: &str,
    priority: i32,
    max_retries: Option<u32>,
) -> anyhow::Result<()> {
    if !config.storage.enabled {
        bail!("submit needs persistent storage; enable [storage] in the configuration");
    }
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;

    let mut request = JobRequest::new(job_type, payload).with_priority(priority);
    if let Some(max_retries) = max_retries {
        request = request.with_max_retries(max_retries);
    }

    let queue = queue_from_config(config).await?;
    let result = queue.enqueue(request).await?;
    println!("{}", result.job_id);
    Ok(())
}

/// Count persisted jobs by status. Reads storage only, so it is safe to
/// run next to a live worker.
async fn stats(config: &taskhub_config::Config) -> anyhow::Result<()> {
    let Some(storage) = storage_from_config(&config.storage).await? else {
        bail!("stats reads persistent storage; enable [storage] in the configuration");
    };

    let mut stats = QueueStats::default();
    for key in storage.list(QUEUE_KEY_PREFIX).await? {
        match storage.read(&key).await {
            Ok(Some(job)) => stats.record(job.status),
            Ok(None) => {}
            Err(error) => tracing::warn!(%key, %error, "skipping unreadable job record"),
        }
    }

    let queue = queue_from_config(config).await?;
    let dead = queue.dead_letters().await?.len();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "jobs": stats,
            "deadLetters": dead,
        }))?
    );
    Ok(())
}

async fn dead_letters(config: &taskhub_config::Config) -> anyhow::Result<()> {
    if !config.storage.enabled {
        bail!("dead letters are only kept with persistent storage enabled");
    }
    let queue = queue_from_config(config).await?;
    let letters = queue.dead_letters().await?;
    println!("{}", serde_json::to_string_pretty(&letters)?);
    Ok(())
}
