//! Repository boundary: `SchedulerCommandRepository` and
//! `SchedulerRuntimeRepository` capture every operation the four workers
//! need. `SqlxSchedulerRepository` (same module, sibling file) implements
//! both traits over one `sqlx::AnyPool`; tests can mock these traits
//! directly so worker logic (dispatcher retry policy, ack correlation,
//! sweeper claiming) is exercised without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{DeviceEventName, SchedulerCommand, SchedulerCommandAction, SchedulerDayOfWeek};
use scheduler::{DispatchEntry, DueSchedulerEntry, MeasurementView, ProviderView};
use uuid::Uuid;

/// Outcome of `mark_ack`: `changed = false` means the command was already
/// terminal (or didn't exist) and no state was mutated.
pub struct MarkAckOutcome {
    pub command: Option<SchedulerCommand>,
    pub changed: bool,
}

#[async_trait]
pub trait SchedulerCommandRepository: Send + Sync {
    /// Paginated due-scan: slots whose `start_utc_time == hhmm` on `day_of_week`,
    /// owning device in `SCHEDULE` mode, microcontroller enabled.
    async fn fetch_due_entries(
        &self,
        day_of_week: SchedulerDayOfWeek,
        hhmm_utc: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<DueSchedulerEntry>>;

    /// Paginated end-scan: same filter but against `end_utc_time`. Always OFF.
    async fn fetch_end_entries(
        &self,
        day_of_week: SchedulerDayOfWeek,
        hhmm_utc: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<DueSchedulerEntry>>;

    async fn get_provider(&self, provider_id: i64) -> anyhow::Result<Option<ProviderView>>;

    async fn get_latest_measurement(
        &self,
        provider_id: i64,
    ) -> anyhow::Result<Option<MeasurementView>>;

    /// Inserts a `PENDING` command row. A unique-constraint collision (an
    /// already-enqueued non-terminal command for this
    /// device/slot/minute/action) is swallowed and reported as `Ok(false)`.
    #[allow(clippy::too_many_arguments)]
    async fn enqueue_command(
        &self,
        device_id: i64,
        microcontroller_id: i64,
        slot_id: i64,
        action: SchedulerCommandAction,
        minute_key: DateTime<Utc>,
        trigger_reason: &str,
        measured_value: Option<f64>,
        measured_unit: Option<&str>,
    ) -> anyhow::Result<bool>;

    async fn append_device_event(
        &self,
        device_id: i64,
        event_name: DeviceEventName,
        trigger_reason: Option<&str>,
        pin_state: Option<bool>,
        measured_value: Option<f64>,
        measured_unit: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Claims up to `limit` `PENDING`/`PENDING_RETRY` commands whose
    /// `next_attempt_at` has passed, respecting the per-microcontroller
    /// inflight cap, and transitions them to `IN_FLIGHT`.
    async fn claim_pending_for_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        ack_timeout_sec: i64,
        max_inflight_per_microcontroller: i64,
    ) -> anyhow::Result<Vec<DispatchEntry>>;

    /// Applies the publish-retry policy to one command. Returns `None` if
    /// the command no longer exists or is already terminal.
    async fn mark_publish_failure(
        &self,
        command_id: Uuid,
        now: DateTime<Utc>,
        max_retry: i32,
        retry_backoff_sec: f64,
        retry_jitter_sec: f64,
    ) -> anyhow::Result<Option<SchedulerCommand>>;

    /// Correlates an inbound ack to a command and applies the terminal
    /// transition. Idempotent: a second ack for an already-terminal command
    /// returns `changed = false` and performs no mutation.
    async fn mark_ack(
        &self,
        command_id: Uuid,
        transport_ok: bool,
        actual_state: Option<bool>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<MarkAckOutcome>;

    /// Claims up to `limit` `IN_FLIGHT` commands whose `ack_deadline_at` has
    /// passed and transitions them straight to `ACK_FAIL` (no retry: timeouts
    /// and publish failures are deliberately handled differently).
    async fn claim_timeouts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<SchedulerCommand>>;
}

#[async_trait]
pub trait SchedulerRuntimeRepository: Send + Sync {
    async fn update_device_state(
        &self,
        device_id: i64,
        is_on: bool,
        changed_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}
