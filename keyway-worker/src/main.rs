//! Keyway background worker
//!
//! Loads configuration, starts an in-process job queue with a processor per
//! configured job type, and runs until Ctrl-C.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use keyway_job_queue::{JobOptions, JobQueue, NoOpProcessor, QueueConfig, QueueEvent};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

mod cli;
mod tracing_setup;

use cli::CliArgs;
use tracing_setup::install_tracing_from_config;

/// Job type registered when neither the config nor the CLI names one.
const FALLBACK_JOB_TYPE: &str = "noop";

/// How long in-flight jobs get to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = load_config(args.config_path.as_deref())?;
    install_tracing_from_config(&config.logging);
    tracing::info!(
        config_path = args.config_path.as_deref().unwrap_or("-"),
        max_workers = config.queue.max_workers,
        tick_interval_ms = config.queue.tick_interval_ms,
        "configuration loaded"
    );

    let queue = JobQueue::with_config(queue_config_from(&config.queue))
        .context("invalid queue configuration")?;

    let mut job_types = config.queue.job_types.clone();
    job_types.extend(args.job_types.iter().cloned());
    job_types.sort();
    job_types.dedup();
    if job_types.is_empty() {
        job_types.push(FALLBACK_JOB_TYPE.to_string());
    }
    for job_type in &job_types {
        queue
            .register_processor(NoOpProcessor::new(job_type.clone()))
            .await;
    }
    tracing::info!(job_types = ?job_types, "processors registered");

    spawn_event_logger(&queue);
    if args.stats_interval_secs > 0 {
        spawn_stats_logger(&queue, Duration::from_secs(args.stats_interval_secs));
    }

    if !config.queue.auto_start {
        queue.start().await;
    }

    for n in 0..args.submit {
        let job_type = &job_types[n % job_types.len()];
        let job_id = queue
            .submit(job_type.clone(), json!({ "seq": n }), JobOptions::default())
            .await?;
        tracing::debug!(%job_id, job_type = %job_type, "demo job submitted");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!(
        grace_secs = SHUTDOWN_GRACE.as_secs(),
        "shutdown requested, draining workers"
    );

    match queue.close(SHUTDOWN_GRACE).await {
        Ok(()) => tracing::info!("job queue drained"),
        Err(e) => tracing::warn!(error = %e, "job queue did not drain in time"),
    }
    let stats = queue.stats().await;
    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        pending = stats.pending,
        "worker exiting"
    );

    Ok(())
}

/// Load and validate configuration from file or defaults.
fn load_config(path: Option<&str>) -> anyhow::Result<keyway_config::Config> {
    let config = keyway_config::load_config(path).map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;
    keyway_config::validate_config(&config).map_err(|e| {
        eprintln!("invalid configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(config)
}

fn queue_config_from(settings: &keyway_config::QueueSettings) -> QueueConfig {
    QueueConfig {
        max_workers: settings.max_workers,
        tick_interval: Duration::from_millis(settings.tick_interval_ms),
        auto_start: settings.auto_start,
        event_capacity: settings.event_capacity,
    }
}

/// Forward every queue event to the log.
fn spawn_event_logger(queue: &JobQueue) {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &QueueEvent) {
    match event.job() {
        Some(job) => tracing::info!(
            event = %event.kind(),
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            attempts = job.attempts,
            error = job.error.as_deref().unwrap_or(""),
            "queue event"
        ),
        None => tracing::info!(event = %event.kind(), "queue event"),
    }
}

fn spawn_stats_logger(queue: &JobQueue, period: Duration) {
    let queue = queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = queue.stats().await;
            tracing::info!(
                pending = stats.pending,
                active = stats.active,
                delayed = stats.delayed,
                completed = stats.completed,
                failed = stats.failed,
                total = stats.total,
                running = stats.is_running,
                workers = stats.active_workers,
                "queue stats"
            );
        }
    });
}
