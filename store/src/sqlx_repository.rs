use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use scheduler::{DispatchEntry, DueSchedulerEntry, MeasurementView, ProviderView};
use scheduler_core::{
    DeviceEventName, DeviceMode, SchedulerCommand, SchedulerCommandAction, SchedulerCommandStatus,
    SchedulerDayOfWeek,
};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::repository::{MarkAckOutcome, SchedulerCommandRepository, SchedulerRuntimeRepository};

/// `sqlx::AnyPool`-backed implementation of both repository traits.
///
/// Claims (`claim_pending_for_dispatch`, `claim_timeouts`, `mark_ack`,
/// `mark_publish_failure`) use a per-row compare-and-swap `UPDATE ... WHERE
/// status = <expected>` rather than `SELECT ... FOR UPDATE SKIP LOCKED`: the
/// `Any` driver has to run against both Postgres and SQLite (the latter has
/// no row locking), and a conditional single-row UPDATE gives the same
/// "parallel replicas don't block and don't double-claim" guarantee without
/// depending on backend-specific lock syntax.
pub struct SqlxSchedulerRepository {
    pool: AnyPool,
}

impl SqlxSchedulerRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn fetch_entries(
        &self,
        time_column: &str,
        day_of_week: SchedulerDayOfWeek,
        hhmm_utc: &str,
        limit: i64,
        offset: i64,
        action: SchedulerCommandAction,
    ) -> anyhow::Result<Vec<DueSchedulerEntry>> {
        let sql = format!(
            r#"
SELECT sl.id as slot_id, sl.scheduler_id, d.id as device_id, d.microcontroller_id,
       sl.day_of_week, sl.start_utc_time, sl.end_utc_time, sl.use_power_threshold,
       COALESCE(sl.power_provider_id, mc.power_provider_id) as power_provider_id,
       sl.power_threshold_value, sl.power_threshold_unit
FROM scheduler_slots sl
JOIN devices d ON d.scheduler_id = sl.scheduler_id
JOIN microcontrollers mc ON mc.id = d.microcontroller_id
WHERE sl.day_of_week = ? AND sl.{time_column} = ? AND d.mode = 'SCHEDULE' AND mc.enabled = true
ORDER BY sl.id
LIMIT ? OFFSET ?;
"#
        );

        let rows = sqlx::query(&sql)
            .bind(day_of_week.as_str())
            .bind(hhmm_utc)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("fetch_entries query failed")?;

        rows.iter().map(|r| row_to_due_entry(r, action)).collect()
    }
}

#[async_trait]
impl SchedulerCommandRepository for SqlxSchedulerRepository {
    async fn fetch_due_entries(
        &self,
        day_of_week: SchedulerDayOfWeek,
        hhmm_utc: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<DueSchedulerEntry>> {
        self.fetch_entries(
            "start_utc_time",
            day_of_week,
            hhmm_utc,
            limit,
            offset,
            SchedulerCommandAction::On,
        )
        .await
    }

    async fn fetch_end_entries(
        &self,
        day_of_week: SchedulerDayOfWeek,
        hhmm_utc: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<DueSchedulerEntry>> {
        self.fetch_entries(
            "end_utc_time",
            day_of_week,
            hhmm_utc,
            limit,
            offset,
            SchedulerCommandAction::Off,
        )
        .await
    }

    async fn get_provider(&self, provider_id: i64) -> anyhow::Result<Option<ProviderView>> {
        let row = sqlx::query(
            "SELECT unit, expected_interval_sec, enabled FROM providers WHERE id = ?",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ProviderView {
            enabled: r.get::<bool, _>("enabled"),
            unit: r.get::<Option<String>, _>("unit"),
            expected_interval_sec: r.get::<Option<i64>, _>("expected_interval_sec"),
        }))
    }

    async fn get_latest_measurement(
        &self,
        provider_id: i64,
    ) -> anyhow::Result<Option<MeasurementView>> {
        let row = sqlx::query(
            r#"
SELECT measured_at, measured_value, measured_unit
FROM provider_measurements
WHERE provider_id = ?
ORDER BY measured_at DESC
LIMIT 1;
"#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(r) => Ok(Some(MeasurementView {
                measured_at: parse_datetime(&r.get::<String, _>("measured_at"))?,
                measured_value: r.get::<Option<f64>, _>("measured_value"),
                measured_unit: r.get::<Option<String>, _>("measured_unit"),
            })),
        }
    }

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
    ) -> anyhow::Result<bool> {
        let command_id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
INSERT INTO scheduler_commands
  (command_id, device_id, microcontroller_id, slot_id, action, minute_key, status,
   attempt, ack_deadline_at, next_attempt_at, trigger_reason, measured_value, measured_unit)
VALUES (?, ?, ?, ?, ?, ?, 'PENDING', 0, NULL, NULL, ?, ?, ?);
"#,
        )
        .bind(command_id.to_string())
        .bind(device_id)
        .bind(microcontroller_id)
        .bind(slot_id)
        .bind(action.as_str())
        .bind(minute_key.to_rfc3339())
        .bind(trigger_reason)
        .bind(measured_value)
        .bind(measured_unit)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(other) => Err(other.into()),
        }
    }

    async fn append_device_event(
        &self,
        device_id: i64,
        event_name: DeviceEventName,
        trigger_reason: Option<&str>,
        pin_state: Option<bool>,
        measured_value: Option<f64>,
        measured_unit: Option<&str>,
    ) -> anyhow::Result<()> {
        // Append-only audit log; the id only needs to be unique, never looked
        // up by value, so a timestamp-derived id avoids a second round-trip
        // for a sequence/identity column that differs across backends.
        let id = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        sqlx::query(
            r#"
INSERT INTO device_events
  (id, device_id, event_name, trigger_reason, pin_state, measured_value, measured_unit, source, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(id)
        .bind(device_id)
        .bind(event_name.as_str())
        .bind(trigger_reason)
        .bind(pin_state)
        .bind(measured_value)
        .bind(measured_unit)
        .bind("smart-schedulers")
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_pending_for_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        ack_timeout_sec: i64,
        max_inflight_per_microcontroller: i64,
    ) -> anyhow::Result<Vec<DispatchEntry>> {
        // Overfetch candidates so the fairness filter below has enough rows
        // to work with even when one microcontroller dominates the head of
        // the claim ordering.
        let candidate_limit = (limit.max(1) * 5).max(50);

        let candidates = sqlx::query(
            r#"
SELECT c.command_id, c.device_id, c.microcontroller_id, c.slot_id, c.action, c.minute_key,
       c.status, c.attempt, c.ack_deadline_at, c.next_attempt_at, c.trigger_reason,
       c.measured_value, c.measured_unit,
       d.uuid as device_uuid, d.device_number, d.mode, mc.uuid as mc_uuid
FROM scheduler_commands c
JOIN devices d ON d.id = c.device_id
JOIN microcontrollers mc ON mc.id = c.microcontroller_id
WHERE c.status IN ('PENDING', 'PENDING_RETRY') AND (c.next_attempt_at IS NULL OR c.next_attempt_at <= ?)
ORDER BY (c.next_attempt_at IS NULL) DESC, c.next_attempt_at ASC, c.command_id ASC
LIMIT ?;
"#,
        )
        .bind(now.to_rfc3339())
        .bind(candidate_limit)
        .fetch_all(&self.pool)
        .await?;

        let ack_deadline = now + chrono::Duration::seconds(ack_timeout_sec);
        let mut claimed = Vec::new();

        for row in &candidates {
            if claimed.len() as i64 >= limit {
                break;
            }

            let microcontroller_id = row.get::<i64, _>("microcontroller_id");
            let command_id: String = row.get("command_id");

            // The in-flight cap is enforced inside the same UPDATE statement
            // that performs the claim, via a correlated subquery recounting
            // IN_FLIGHT rows for this microcontroller at write time. A
            // process-local count can't see what a concurrent replica is
            // claiming right now; this can, because each replica's UPDATE
            // re-evaluates the count against the database, not a cache.
            let update_result = sqlx::query(
                r#"
UPDATE scheduler_commands
SET status = 'IN_FLIGHT', attempt = attempt + 1, ack_deadline_at = ?, next_attempt_at = NULL
WHERE command_id = ?
  AND status IN ('PENDING', 'PENDING_RETRY')
  AND (SELECT COUNT(*) FROM scheduler_commands WHERE microcontroller_id = ? AND status = 'IN_FLIGHT') < ?;
"#,
            )
            .bind(ack_deadline.to_rfc3339())
            .bind(&command_id)
            .bind(microcontroller_id)
            .bind(max_inflight_per_microcontroller)
            .execute(&self.pool)
            .await?;

            if update_result.rows_affected() != 1 {
                // Another replica won the race for this row, or this
                // microcontroller is already at its inflight cap; leave it be.
                continue;
            }

            let mut command = row_to_command(row)?;
            command.status = SchedulerCommandStatus::InFlight;
            command.attempt += 1;
            command.ack_deadline_at = Some(ack_deadline);
            command.next_attempt_at = None;

            claimed.push(DispatchEntry {
                command,
                device_uuid: parse_uuid(&row.get::<String, _>("device_uuid"))?,
                device_number: row.get::<i32, _>("device_number"),
                mode: parse_mode(&row.get::<String, _>("mode"))?,
                microcontroller_uuid: parse_uuid(&row.get::<String, _>("mc_uuid"))?,
            });
        }

        Ok(claimed)
    }

    async fn mark_publish_failure(
        &self,
        command_id: Uuid,
        now: DateTime<Utc>,
        max_retry: i32,
        retry_backoff_sec: f64,
        retry_jitter_sec: f64,
    ) -> anyhow::Result<Option<SchedulerCommand>> {
        let row = sqlx::query(
            "SELECT attempt FROM scheduler_commands WHERE command_id = ? AND status NOT IN ('ACK_OK', 'ACK_FAIL')",
        )
        .bind(command_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let attempt: i32 = row.get("attempt");

        if attempt < max_retry + 1 {
            let jitter = if retry_jitter_sec > 0.0 {
                rand::thread_rng().gen_range(0.0..=retry_jitter_sec)
            } else {
                0.0
            };
            let delay_ms = ((retry_backoff_sec + jitter) * 1000.0).round() as i64;
            let next_attempt_at = now + chrono::Duration::milliseconds(delay_ms);

            sqlx::query(
                r#"
UPDATE scheduler_commands
SET status = 'PENDING_RETRY', ack_deadline_at = NULL, next_attempt_at = ?
WHERE command_id = ?;
"#,
            )
            .bind(next_attempt_at.to_rfc3339())
            .bind(command_id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE scheduler_commands SET status = 'ACK_FAIL' WHERE command_id = ?;")
                .bind(command_id.to_string())
                .execute(&self.pool)
                .await?;
        }

        self.fetch_command(command_id).await
    }

    async fn mark_ack(
        &self,
        command_id: Uuid,
        transport_ok: bool,
        actual_state: Option<bool>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<MarkAckOutcome> {
        let _ = actual_state; // pin_state on the command row isn't persisted; the caller audits it.
        let _ = now; // ack_deadline_at is simply cleared, not stamped with the ack time.
        let existing = self.fetch_command(command_id).await?;

        let Some(existing) = existing else {
            return Ok(MarkAckOutcome {
                command: None,
                changed: false,
            });
        };

        if existing.status.is_terminal() {
            return Ok(MarkAckOutcome {
                command: Some(existing),
                changed: false,
            });
        }

        let new_status = if transport_ok {
            SchedulerCommandStatus::AckOk
        } else {
            SchedulerCommandStatus::AckFail
        };

        let result = sqlx::query(
            r#"
UPDATE scheduler_commands
SET status = ?, ack_deadline_at = NULL
WHERE command_id = ? AND status NOT IN ('ACK_OK', 'ACK_FAIL');
"#,
        )
        .bind(new_status.as_str())
        .bind(command_id.to_string())
        .execute(&self.pool)
        .await?;

        let updated = self.fetch_command(command_id).await?;

        if result.rows_affected() == 1 {
            Ok(MarkAckOutcome {
                command: updated,
                changed: true,
            })
        } else {
            // Lost a race with another ack/timeout; report unchanged.
            Ok(MarkAckOutcome {
                command: updated,
                changed: false,
            })
        }
    }

    async fn claim_timeouts(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<SchedulerCommand>> {
        let candidates = sqlx::query(
            r#"
SELECT command_id FROM scheduler_commands
WHERE status = 'IN_FLIGHT' AND ack_deadline_at IS NOT NULL AND ack_deadline_at <= ?
ORDER BY command_id
LIMIT ?;
"#,
        )
        .bind(now.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = Vec::new();
        for row in candidates {
            let command_id: String = row.get("command_id");
            let result = sqlx::query(
                "UPDATE scheduler_commands SET status = 'ACK_FAIL' WHERE command_id = ? AND status = 'IN_FLIGHT';",
            )
            .bind(&command_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                let uuid = parse_uuid(&command_id)?;
                if let Some(command) = self.fetch_command(uuid).await? {
                    claimed.push(command);
                }
            }
        }

        Ok(claimed)
    }
}

impl SqlxSchedulerRepository {
    async fn fetch_command(&self, command_id: Uuid) -> anyhow::Result<Option<SchedulerCommand>> {
        let row = sqlx::query(
            r#"
SELECT command_id, device_id, microcontroller_id, slot_id, action, minute_key, status, attempt,
       ack_deadline_at, next_attempt_at, trigger_reason, measured_value, measured_unit
FROM scheduler_commands WHERE command_id = ?;
"#,
        )
        .bind(command_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(r) => Ok(Some(row_to_command(&r)?)),
        }
    }
}

#[async_trait]
impl SchedulerRuntimeRepository for SqlxSchedulerRepository {
    async fn update_device_state(
        &self,
        device_id: i64,
        is_on: bool,
        changed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE devices SET manual_state = ?, last_state_change_at = ? WHERE id = ?;",
        )
        .bind(is_on)
        .bind(changed_at.to_rfc3339())
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_due_entry(r: &AnyRow, action: SchedulerCommandAction) -> anyhow::Result<DueSchedulerEntry> {
    Ok(DueSchedulerEntry {
        slot_id: r.get::<i64, _>("slot_id"),
        scheduler_id: r.get::<i64, _>("scheduler_id"),
        device_id: r.get::<i64, _>("device_id"),
        microcontroller_id: r.get::<i64, _>("microcontroller_id"),
        day_of_week: SchedulerDayOfWeek::parse(&r.get::<String, _>("day_of_week"))
            .ok_or_else(|| anyhow!("invalid day_of_week in row"))?,
        start_utc_time: r
            .get::<Option<String>, _>("start_utc_time")
            .map(|s| parse_naive_time(&s))
            .transpose()?,
        end_utc_time: r
            .get::<Option<String>, _>("end_utc_time")
            .map(|s| parse_naive_time(&s))
            .transpose()?,
        use_power_threshold: r.get::<bool, _>("use_power_threshold"),
        power_provider_id: r.get::<Option<i64>, _>("power_provider_id"),
        power_threshold_value: r.get::<Option<f64>, _>("power_threshold_value"),
        power_threshold_unit: r.get::<Option<String>, _>("power_threshold_unit"),
        action,
    })
}

fn row_to_command(r: &AnyRow) -> anyhow::Result<SchedulerCommand> {
    Ok(SchedulerCommand {
        command_id: parse_uuid(&r.get::<String, _>("command_id"))?,
        device_id: r.get::<i64, _>("device_id"),
        microcontroller_id: r.get::<i64, _>("microcontroller_id"),
        slot_id: r.get::<i64, _>("slot_id"),
        action: SchedulerCommandAction::parse(&r.get::<String, _>("action"))
            .ok_or_else(|| anyhow!("invalid action in row"))?,
        minute_key: parse_datetime(&r.get::<String, _>("minute_key"))?,
        status: SchedulerCommandStatus::parse(&r.get::<String, _>("status"))
            .ok_or_else(|| anyhow!("invalid status in row"))?,
        attempt: r.get::<i32, _>("attempt"),
        ack_deadline_at: r
            .get::<Option<String>, _>("ack_deadline_at")
            .map(|s| parse_datetime(&s))
            .transpose()?,
        next_attempt_at: r
            .get::<Option<String>, _>("next_attempt_at")
            .map(|s| parse_datetime(&s))
            .transpose()?,
        trigger_reason: r.get::<String, _>("trigger_reason"),
        measured_value: r.get::<Option<f64>, _>("measured_value"),
        measured_unit: r.get::<Option<String>, _>("measured_unit"),
    })
}

fn parse_mode(s: &str) -> anyhow::Result<DeviceMode> {
    Ok(match s {
        "MANUAL" => DeviceMode::Manual,
        "AUTO_POWER" => DeviceMode::AutoPower,
        "SCHEDULE" => DeviceMode::Schedule,
        other => return Err(anyhow!("invalid device mode in row: {other}")),
    })
}

fn parse_uuid(s: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(s).context("invalid uuid in row")
}

fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("invalid timestamp in row")?
        .with_timezone(&Utc))
}

fn parse_naive_time(s: &str) -> anyhow::Result<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(s, "%H:%M").context("invalid HH:MM time in row")
}
