//! Ack correlator: subscribes once to the wildcard ack subject and applies
//! the terminal transition per message.

use std::sync::Arc;

use chrono::Utc;
use scheduler_core::{DeviceEventName, SchedulerCommandAction, SchedulerCommandStatus};
use store::{SchedulerCommandRepository, SchedulerRuntimeRepository};
use tokio_util::sync::CancellationToken;
use transport::{Transport, parse_ack_envelope};

use crate::metrics::counters::Counters;

pub struct AckConsumer<C, Rt, T>
where
    C: SchedulerCommandRepository,
    Rt: SchedulerRuntimeRepository,
    T: Transport,
{
    command_repo: Arc<C>,
    runtime_repo: Arc<Rt>,
    transport: Arc<T>,
    counters: Counters,
    stream_name: String,
    stop: CancellationToken,
}

impl<C, Rt, T> AckConsumer<C, Rt, T>
where
    C: SchedulerCommandRepository,
    Rt: SchedulerRuntimeRepository,
    T: Transport,
{
    pub fn new(
        command_repo: Arc<C>,
        runtime_repo: Arc<Rt>,
        transport: Arc<T>,
        counters: Counters,
        stream_name: String,
        stop: CancellationToken,
    ) -> Self {
        Self {
            command_repo,
            runtime_repo,
            transport,
            counters,
            stream_name,
            stop,
        }
    }

    pub async fn run(self) {
        let subject = transport::subjects::ack_wildcard_subject(&self.stream_name);
        tracing::info!(subject = %subject, "scheduler ACK consumer starting");

        let mut subscription = match self.transport.subscribe_with_reconnect(subject.clone()).await {
            Ok(sub) => sub,
            Err(err) => {
                tracing::error!(error = %err, "ACK consumer failed to subscribe, giving up");
                return;
            }
        };

        loop {
            tokio::select! {
                message = subscription.next() => {
                    match message {
                        Some(payload) => self.handle_message(&payload).await,
                        None => {
                            tracing::warn!("ACK subscription stream ended");
                            break;
                        }
                    }
                }
                _ = self.stop.cancelled() => break,
            }
        }

        tracing::info!("scheduler ACK consumer stopped");
    }

    async fn handle_message(&self, raw: &[u8]) {
        let Some(envelope) = parse_ack_envelope(raw) else {
            self.counters
                .ack_malformed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!("ACK payload without valid data object");
            return;
        };

        let Some(command_id) = envelope.data.command_id else {
            self.counters
                .ack_malformed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!("ACK missing command_id; cannot correlate");
            return;
        };

        let transport_ok = envelope.data.ok;
        let actual_state = envelope.data.resolved_state();
        let now = Utc::now();

        let outcome = match self
            .command_repo
            .mark_ack(command_id, transport_ok, actual_state, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, command_id = %command_id, "mark_ack failed");
                return;
            }
        };

        let Some(command) = outcome.command else {
            self.counters
                .ack_unknown_command
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!(command_id = %command_id, "ACK for unknown command_id");
            return;
        };

        if !outcome.changed {
            return;
        }

        self.counters
            .ack_correlated
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if command.status == SchedulerCommandStatus::AckOk {
            if let Some(state) = actual_state {
                if let Err(err) = self
                    .runtime_repo
                    .update_device_state(command.device_id, state, now)
                    .await
                {
                    tracing::error!(error = %err, device_id = command.device_id, "update_device_state failed");
                }
            }
        }

        let (event_name, trigger_reason) = if command.status == SchedulerCommandStatus::AckOk {
            let event_name = if command.action == SchedulerCommandAction::On {
                DeviceEventName::SchedulerTriggerOn
            } else {
                DeviceEventName::DeviceOff
            };
            (event_name, "ACK_OK")
        } else {
            (DeviceEventName::SchedulerAckFailed, "ACK_FAILED")
        };

        if let Err(err) = self
            .command_repo
            .append_device_event(
                command.device_id,
                event_name,
                Some(trigger_reason),
                actual_state,
                None,
                None,
            )
            .await
        {
            tracing::error!(error = %err, "failed to append ack audit event");
        }

        tracing::info!(
            command_id = %command_id,
            status = command.status.as_str(),
            transport_ok,
            actual_state = ?actual_state,
            "ACK correlated"
        );
    }
}
