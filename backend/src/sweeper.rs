//! Periodic reaper: fails commands whose ack deadline has passed. Timed-out
//! commands never retry — retry only applies to publish-path failures; a
//! silent device is a different failure mode than a broken transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::DeviceEventName;
use store::SchedulerCommandRepository;
use tokio_util::sync::CancellationToken;

use crate::metrics::counters::Counters;

pub struct TimeoutSweeper<R: SchedulerCommandRepository> {
    repo: Arc<R>,
    counters: Counters,
    interval: Duration,
    batch_size: i64,
    stop: CancellationToken,
}

impl<R: SchedulerCommandRepository> TimeoutSweeper<R> {
    pub fn new(
        repo: Arc<R>,
        counters: Counters,
        interval_sec: f64,
        batch_size: i64,
        stop: CancellationToken,
    ) -> Self {
        Self {
            repo,
            counters,
            interval: Duration::from_secs_f64(interval_sec.max(0.1)),
            batch_size: batch_size.max(1),
            stop,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            interval_sec = self.interval.as_secs_f64(),
            batch_size = self.batch_size,
            "scheduler timeout sweeper starting"
        );

        while !self.stop.is_cancelled() {
            let now = Utc::now();
            match self.repo.claim_timeouts(now, self.batch_size).await {
                Ok(timed_out) => {
                    if !timed_out.is_empty() {
                        self.counters
                            .sweeper_timed_out
                            .fetch_add(timed_out.len() as u64, std::sync::atomic::Ordering::Relaxed);
                    }
                    for command in &timed_out {
                        if let Err(err) = self
                            .repo
                            .append_device_event(
                                command.device_id,
                                DeviceEventName::SchedulerAckFailed,
                                Some("ACK_TIMEOUT"),
                                None,
                                None,
                                None,
                            )
                            .await
                        {
                            tracing::error!(error = %err, command_id = %command.command_id, "failed to append timeout audit event");
                        }
                    }
                    if !timed_out.is_empty() {
                        tracing::warn!(count = timed_out.len(), "scheduler timeout sweeper reaped commands");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "timeout sweeper claim failed, retrying next interval");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.stop.cancelled() => {}
            }
        }

        tracing::info!("scheduler timeout sweeper stopped");
    }
}
