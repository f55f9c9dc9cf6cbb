//! Minute-tick scanner: once per wall-clock minute, runs a due-scan (ON) and
//! an end-scan (OFF) against slots matching the current UTC day/hour/minute,
//! paginated so a large fleet never holds one long-lived transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use scheduler_core::{DeviceEventName, SchedulerCommandAction};
use store::{MinuteIdempotencyStore, SchedulerCommandRepository};
use tokio_util::sync::CancellationToken;

use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;

pub struct Planner<R: SchedulerCommandRepository> {
    repo: Arc<R>,
    idempotency: Arc<MinuteIdempotencyStore>,
    counters: Counters,
    batch_size: i64,
    last_processed_minute: Option<DateTime<Utc>>,
    stop: CancellationToken,
}

impl<R: SchedulerCommandRepository> Planner<R> {
    pub fn new(
        repo: Arc<R>,
        idempotency: Arc<MinuteIdempotencyStore>,
        counters: Counters,
        batch_size: i64,
        stop: CancellationToken,
    ) -> Self {
        Self {
            repo,
            idempotency,
            counters,
            batch_size: batch_size.max(1),
            last_processed_minute: None,
            stop,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(batch_size = self.batch_size, "scheduler planner starting");

        while !self.stop.is_cancelled() {
            let minute = truncate_to_minute(Utc::now());

            let should_process = match self.last_processed_minute {
                Some(last) => minute > last,
                None => true,
            };

            if should_process {
                if let Err(err) = self.process_minute(minute).await {
                    tracing::error!(error = %err, minute = %minute, "planner tick failed");
                }
                self.last_processed_minute = Some(minute);
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                _ = self.stop.cancelled() => {}
            }
        }

        tracing::info!("scheduler planner stopped");
    }

    async fn process_minute(&self, minute: DateTime<Utc>) -> anyhow::Result<()> {
        let day_of_week = scheduler_core::SchedulerDayOfWeek::from_chrono(minute.weekday());
        let hhmm = format!("{:02}:{:02}", minute.hour(), minute.minute());

        let mut provider_cache: HashMap<i64, Option<scheduler::ProviderView>> = HashMap::new();
        let mut measurement_cache: HashMap<i64, Option<scheduler::MeasurementView>> =
            HashMap::new();

        self.run_scan(
            day_of_week,
            &hhmm,
            minute,
            SchedulerCommandAction::On,
            &mut provider_cache,
            &mut measurement_cache,
        )
        .await?;

        self.run_scan(
            day_of_week,
            &hhmm,
            minute,
            SchedulerCommandAction::Off,
            &mut provider_cache,
            &mut measurement_cache,
        )
        .await?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_scan(
        &self,
        day_of_week: scheduler_core::SchedulerDayOfWeek,
        hhmm: &str,
        minute: DateTime<Utc>,
        action: SchedulerCommandAction,
        provider_cache: &mut HashMap<i64, Option<scheduler::ProviderView>>,
        measurement_cache: &mut HashMap<i64, Option<scheduler::MeasurementView>>,
    ) -> anyhow::Result<()> {
        let mut offset = 0i64;
        loop {
            let page = warn_if_slow(
                "planner_scan_page",
                Duration::from_millis(250),
                async {
                    match action {
                        SchedulerCommandAction::On => {
                            self.repo
                                .fetch_due_entries(day_of_week, hhmm, self.batch_size, offset)
                                .await
                        }
                        SchedulerCommandAction::Off => {
                            self.repo
                                .fetch_end_entries(day_of_week, hhmm, self.batch_size, offset)
                                .await
                        }
                    }
                },
            )
            .await?;

            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            for entry in page {
                self.process_entry(entry, minute, action, provider_cache, measurement_cache)
                    .await?;
            }

            if (page_len as i64) < self.batch_size {
                break;
            }
            offset += self.batch_size;
        }

        Ok(())
    }

    async fn process_entry(
        &self,
        entry: scheduler::DueSchedulerEntry,
        minute: DateTime<Utc>,
        action: SchedulerCommandAction,
        provider_cache: &mut HashMap<i64, Option<scheduler::ProviderView>>,
        measurement_cache: &mut HashMap<i64, Option<scheduler::MeasurementView>>,
    ) -> anyhow::Result<()> {
        let key = store::minute_key(entry.device_id, entry.slot_id, minute, action);
        if !self.idempotency.acquire(&key).await {
            return Ok(());
        }

        match action {
            SchedulerCommandAction::Off => {
                let enqueued = self
                    .repo
                    .enqueue_command(
                        entry.device_id,
                        entry.microcontroller_id,
                        entry.slot_id,
                        SchedulerCommandAction::Off,
                        minute,
                        "SCHEDULER_END",
                        None,
                        None,
                    )
                    .await?;
                if enqueued {
                    self.counters.planner_enqueued.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                } else {
                    self.counters
                        .planner_duplicate_suppressed
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
            SchedulerCommandAction::On => {
                let provider = if let Some(provider_id) = entry.power_provider_id {
                    if let Some(cached) = provider_cache.get(&provider_id) {
                        cached.clone()
                    } else {
                        let fetched = self.repo.get_provider(provider_id).await?;
                        provider_cache.insert(provider_id, fetched.clone());
                        fetched
                    }
                } else {
                    None
                };

                let measurement = if let Some(provider_id) = entry.power_provider_id {
                    if let Some(cached) = measurement_cache.get(&provider_id) {
                        cached.clone()
                    } else {
                        let fetched = self.repo.get_latest_measurement(provider_id).await?;
                        measurement_cache.insert(provider_id, fetched.clone());
                        fetched
                    }
                } else {
                    None
                };

                let due_entry = scheduler::DueSchedulerEntry {
                    action: SchedulerCommandAction::On,
                    ..entry
                };
                let decision = scheduler::decide(&due_entry, minute, provider.as_ref(), measurement.as_ref());

                match decision.kind {
                    scheduler::DecisionKind::AllowOn => {
                        let enqueued = self
                            .repo
                            .enqueue_command(
                                due_entry.device_id,
                                due_entry.microcontroller_id,
                                due_entry.slot_id,
                                SchedulerCommandAction::On,
                                minute,
                                decision.trigger_reason,
                                decision.measured_value,
                                decision.measured_unit.as_deref(),
                            )
                            .await?;
                        if enqueued {
                            self.counters.planner_enqueued.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        } else {
                            self.counters
                                .planner_duplicate_suppressed
                                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                    scheduler::DecisionKind::SkipNoPowerData => {
                        self.counters
                            .planner_skip_no_power_data
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        self.repo
                            .append_device_event(
                                due_entry.device_id,
                                DeviceEventName::SchedulerSkippedNoPowerData,
                                Some(decision.trigger_reason),
                                Some(false),
                                None,
                                None,
                            )
                            .await?;
                    }
                    scheduler::DecisionKind::SkipThresholdNotMet => {
                        self.counters
                            .planner_skip_threshold_not_met
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        self.repo
                            .append_device_event(
                                due_entry.device_id,
                                DeviceEventName::SchedulerSkippedThresholdNotMet,
                                Some(decision.trigger_reason),
                                Some(false),
                                decision.measured_value,
                                decision.measured_unit.as_deref(),
                            )
                            .await?;
                    }
                }
            }
        }

        self.counters.planner_ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }
}

fn truncate_to_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0).unwrap().with_nanosecond(0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_to_minute_zeroes_seconds_and_nanos() {
        use chrono::TimeZone;
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 8, 30, 45).unwrap();
        let truncated = truncate_to_minute(t);
        assert_eq!(truncated.second(), 0);
        assert_eq!(truncated.minute(), 30);
    }
}
