//! Concurrent publisher: claims pending commands under a per-microcontroller
//! fairness cap, fans publishes out under a semaphore, and applies the
//! retry/backoff policy to failures. One claim/publish loop serves every
//! microcontroller; the inflight cap (enforced by the claim query) is what
//! gives fairness rather than any partitioning by device or controller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_core::SchedulerCommandAction;
use store::SchedulerCommandRepository;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use transport::{CommandPayload, Transport, build_command_envelope};
use uuid::Uuid;

use crate::metrics::counters::Counters;

pub struct Dispatcher<R: SchedulerCommandRepository, T: Transport> {
    repo: Arc<R>,
    transport: Arc<T>,
    counters: Counters,
    stream_name: String,
    ack_timeout_sec: i64,
    max_concurrency: usize,
    batch_size: i64,
    poll_interval: Duration,
    max_retry: i32,
    retry_backoff_sec: f64,
    retry_jitter_sec: f64,
    max_inflight_per_microcontroller: i64,
    stop: CancellationToken,
}

#[allow(clippy::too_many_arguments)]
impl<R: SchedulerCommandRepository + 'static, T: Transport + 'static> Dispatcher<R, T> {
    pub fn new(
        repo: Arc<R>,
        transport: Arc<T>,
        counters: Counters,
        stream_name: String,
        ack_timeout_sec: i64,
        max_concurrency: usize,
        batch_size: i64,
        poll_interval_sec: f64,
        max_retry: i32,
        retry_backoff_sec: f64,
        retry_jitter_sec: f64,
        max_inflight_per_microcontroller: i64,
        stop: CancellationToken,
    ) -> Self {
        Self {
            repo,
            transport,
            counters,
            stream_name,
            ack_timeout_sec: ack_timeout_sec.max(1),
            max_concurrency: max_concurrency.max(1),
            batch_size: batch_size.max(1),
            poll_interval: Duration::from_secs_f64(poll_interval_sec.max(0.05)),
            max_retry: max_retry.max(0),
            retry_backoff_sec: retry_backoff_sec.max(0.0),
            retry_jitter_sec: retry_jitter_sec.max(0.0),
            max_inflight_per_microcontroller: max_inflight_per_microcontroller.max(1),
            stop,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            batch_size = self.batch_size,
            max_concurrency = self.max_concurrency,
            ack_timeout_sec = self.ack_timeout_sec,
            max_retry = self.max_retry,
            max_inflight_per_microcontroller = self.max_inflight_per_microcontroller,
            "scheduler dispatcher starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        while !self.stop.is_cancelled() {
            let now = Utc::now();
            let claimed = match self
                .repo
                .claim_pending_for_dispatch(
                    now,
                    self.batch_size,
                    self.ack_timeout_sec,
                    self.max_inflight_per_microcontroller,
                )
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(error = %err, "dispatcher claim failed, retrying next poll");
                    Vec::new()
                }
            };

            if claimed.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = self.stop.cancelled() => {}
                }
                continue;
            }

            self.counters
                .dispatch_batches
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let claimed_count = claimed.len();
            self.counters
                .dispatch_claimed
                .fetch_add(claimed_count as u64, std::sync::atomic::Ordering::Relaxed);

            let mut tasks = Vec::with_capacity(claimed.len());
            for entry in claimed {
                let permit = semaphore.clone();
                let transport = self.transport.clone();
                let stream_name = self.stream_name.clone();
                tasks.push(tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore closed");
                    let command_id = entry.command.command_id;
                    let ok = publish_entry(transport.as_ref(), &stream_name, &entry).await;
                    (command_id, ok)
                }));
            }

            let mut failed_ids = Vec::new();
            for task in tasks {
                match task.await {
                    Ok((command_id, true)) => {
                        self.counters
                            .dispatch_publish_ok
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        let _ = command_id;
                    }
                    Ok((command_id, false)) => failed_ids.push(command_id),
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "dispatcher publish task panicked");
                    }
                }
            }

            if !failed_ids.is_empty() {
                self.handle_publish_failures(&failed_ids).await;
            }

            tracing::info!(
                claimed_count,
                failed_count = failed_ids.len(),
                "scheduler dispatcher batch processed"
            );
        }

        tracing::info!("scheduler dispatcher stopped");
    }

    async fn handle_publish_failures(&self, command_ids: &[Uuid]) {
        let now = Utc::now();
        let mut final_failures = 0u64;

        for command_id in command_ids {
            self.counters
                .dispatch_publish_failed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let updated = match self
                .repo
                .mark_publish_failure(
                    *command_id,
                    now,
                    self.max_retry,
                    self.retry_backoff_sec,
                    self.retry_jitter_sec,
                )
                .await
            {
                Ok(updated) => updated,
                Err(err) => {
                    tracing::error!(error = %err, command_id = %command_id, "mark_publish_failure failed");
                    continue;
                }
            };

            let Some(updated) = updated else { continue };

            if updated.status.is_terminal() {
                final_failures += 1;
                if let Err(err) = self
                    .repo
                    .append_device_event(
                        updated.device_id,
                        scheduler_core::DeviceEventName::SchedulerAckFailed,
                        Some("DISPATCH_PUBLISH_FAILED"),
                        None,
                        None,
                        None,
                    )
                    .await
                {
                    tracing::error!(error = %err, "failed to append publish-failure audit event");
                }
            } else {
                self.counters
                    .dispatch_retried
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        if final_failures > 0 {
            tracing::warn!(count = final_failures, "scheduler dispatcher final publish failures");
        }
    }
}

async fn publish_entry<T: Transport>(
    transport: &T,
    stream_name: &str,
    entry: &scheduler::DispatchEntry,
) -> bool {
    let microcontroller_uuid = entry.microcontroller_uuid.to_string();
    let subject = transport::subjects::command_subject(stream_name, &microcontroller_uuid);
    let ack_subject = transport::subjects::ack_subject(stream_name, &microcontroller_uuid);

    let payload = CommandPayload {
        device_id: entry.command.device_id,
        device_uuid: entry.device_uuid,
        device_number: entry.device_number,
        mode: entry.mode.as_str().to_string(),
        command: entry.command.action.as_str().to_string(),
        is_on: entry.command.action == SchedulerCommandAction::On,
        command_id: entry.command.command_id,
    };

    let envelope = build_command_envelope(subject.clone(), ack_subject, entry.microcontroller_uuid, payload);

    let body = match serde_json::to_vec(&envelope) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(error = %err, command_id = %entry.command.command_id, "failed to serialize command envelope");
            return false;
        }
    };

    match transport.publish(subject, body).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                error = %err,
                command_id = %entry.command.command_id,
                device_id = entry.command.device_id,
                action = entry.command.action.as_str(),
                "scheduler dispatch publish failed"
            );
            false
        }
    }
}
