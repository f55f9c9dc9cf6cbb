//! Process lifecycle: spawns the enabled workers, attaches a done-watcher per
//! task that distinguishes cancelled/crashed/exited, waits for a shutdown
//! signal, then stops every worker and closes the transport/KV client within
//! a collective timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ack_consumer::AckConsumer;
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::counters::Counters;
use crate::planner::Planner;
use crate::sweeper::TimeoutSweeper;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run_lifecycle(cfg: AppConfig) -> anyhow::Result<()> {
    tracing::info!("=== LIFECYCLE START ===");

    if !cfg.enable_planner
        && !cfg.enable_dispatcher
        && !cfg.enable_ack_consumer
        && !cfg.enable_timeout_sweeper
    {
        return Err(crate::error::AppError::NoWorkersEnabled.into());
    }

    sqlx::any::install_default_drivers();
    let db = store::Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let repo = Arc::new(store::SqlxSchedulerRepository::new((*db.pool).clone()));

    let idempotency = Arc::new(store::MinuteIdempotencyStore::new(
        cfg.redis_url.clone(),
        cfg.redis_prefix.clone(),
        cfg.idempotency_ttl_sec,
    ));
    idempotency.start().await;

    let transport = Arc::new(transport::NatsTransport::connect(&cfg.nats_url).await?);

    let counters = Counters::default();
    let stop = CancellationToken::new();

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    if cfg.enable_planner {
        let planner = Planner::new(
            repo.clone(),
            idempotency.clone(),
            counters.clone(),
            cfg.planner_batch_size,
            stop.clone(),
        );
        tasks.push(("scheduler-planner", tokio::spawn(planner.run())));
    }

    if cfg.enable_dispatcher {
        let dispatcher = Dispatcher::new(
            repo.clone(),
            transport.clone(),
            counters.clone(),
            cfg.stream_name.clone(),
            cfg.ack_timeout_sec,
            cfg.max_concurrency,
            cfg.dispatch_batch_size,
            cfg.dispatch_poll_sec,
            cfg.dispatch_max_retry,
            cfg.dispatch_retry_backoff_sec,
            cfg.dispatch_retry_jitter_sec,
            cfg.max_inflight_per_microcontroller,
            stop.clone(),
        );
        tasks.push(("scheduler-dispatcher", tokio::spawn(dispatcher.run())));
    }

    if cfg.enable_ack_consumer {
        let ack_consumer = AckConsumer::new(
            repo.clone(),
            repo.clone(),
            transport.clone(),
            counters.clone(),
            cfg.stream_name.clone(),
            stop.clone(),
        );
        tasks.push(("scheduler-ack-consumer", tokio::spawn(ack_consumer.run())));
    }

    if cfg.enable_timeout_sweeper {
        let sweeper = TimeoutSweeper::new(
            repo.clone(),
            counters.clone(),
            cfg.timeout_sweeper_interval_sec,
            cfg.timeout_sweeper_batch_size,
            stop.clone(),
        );
        tasks.push(("scheduler-timeout-sweeper", tokio::spawn(sweeper.run())));
    }

    tracing::info!(
        planner = cfg.enable_planner,
        dispatcher = cfg.enable_dispatcher,
        ack_consumer = cfg.enable_ack_consumer,
        timeout_sweeper = cfg.enable_timeout_sweeper,
        "smart-schedulers started"
    );

    wait_for_shutdown_signal().await;
    tracing::warn!("smart-schedulers shutdown requested");

    stop.cancel();

    for (name, task) in tasks {
        match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task).await {
            Ok(Ok(())) => tracing::info!(name, "worker exited cleanly"),
            Ok(Err(join_err)) if join_err.is_cancelled() => {
                tracing::warn!(name, "worker task cancelled")
            }
            Ok(Err(join_err)) => tracing::error!(name, error = %join_err, "worker crashed"),
            Err(_) => tracing::warn!(name, "worker did not exit within shutdown timeout"),
        }
    }

    transport.close().await?;

    tracing::info!("Lifecycle shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
