use sqlx::AnyPool;

/// Creates every table the scheduling core reads or writes. Device/user CRUD
/// tables are modeled only as far as the four workers need them: no columns
/// beyond what `fetch_due_entries`, `claim_pending_for_dispatch`, `mark_ack`,
/// etc. actually touch.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS microcontrollers (
  id BIGINT PRIMARY KEY,
  uuid TEXT NOT NULL UNIQUE,
  enabled BOOLEAN NOT NULL,
  power_provider_id BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS devices (
  id BIGINT PRIMARY KEY,
  uuid TEXT NOT NULL UNIQUE,
  microcontroller_id BIGINT NOT NULL,
  scheduler_id BIGINT,
  device_number INTEGER NOT NULL,
  mode TEXT NOT NULL,
  manual_state BOOLEAN,
  last_state_change_at TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS schedulers (
  id BIGINT PRIMARY KEY,
  name TEXT NOT NULL,
  user_id BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS scheduler_slots (
  id BIGINT PRIMARY KEY,
  scheduler_id BIGINT NOT NULL,
  day_of_week TEXT NOT NULL,
  start_time TEXT NOT NULL,
  end_time TEXT NOT NULL,
  start_utc_time TEXT,
  end_utc_time TEXT,
  use_power_threshold BOOLEAN NOT NULL,
  power_provider_id BIGINT,
  power_threshold_value DOUBLE PRECISION,
  power_threshold_unit TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS providers (
  id BIGINT PRIMARY KEY,
  unit TEXT,
  expected_interval_sec BIGINT,
  enabled BOOLEAN NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS provider_measurements (
  id BIGINT PRIMARY KEY,
  provider_id BIGINT NOT NULL,
  measured_at TEXT NOT NULL,
  measured_value DOUBLE PRECISION,
  measured_unit TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    // Uniqueness: at most one non-terminal command per
    // (device_id, slot_id, minute_key, action). Enforced with a partial
    // unique index rather than a table-wide unique constraint, since a
    // device/slot/minute/action is allowed to be re-enqueued once the prior
    // attempt has gone terminal (ACK_OK/ACK_FAIL).
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS scheduler_commands (
  command_id TEXT PRIMARY KEY,
  device_id BIGINT NOT NULL,
  microcontroller_id BIGINT NOT NULL,
  slot_id BIGINT NOT NULL,
  action TEXT NOT NULL,
  minute_key TEXT NOT NULL,
  status TEXT NOT NULL,
  attempt INTEGER NOT NULL DEFAULT 0,
  ack_deadline_at TEXT,
  next_attempt_at TEXT,
  trigger_reason TEXT NOT NULL,
  measured_value DOUBLE PRECISION,
  measured_unit TEXT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_scheduler_commands_non_terminal
ON scheduler_commands(device_id, slot_id, minute_key, action)
WHERE status NOT IN ('ACK_OK', 'ACK_FAIL');
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE INDEX IF NOT EXISTS idx_scheduler_commands_claim
ON scheduler_commands(status, next_attempt_at, command_id);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE INDEX IF NOT EXISTS idx_scheduler_commands_timeout
ON scheduler_commands(status, ack_deadline_at);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS device_events (
  id BIGINT PRIMARY KEY,
  device_id BIGINT NOT NULL,
  event_name TEXT NOT NULL,
  trigger_reason TEXT,
  pin_state BOOLEAN,
  measured_value DOUBLE PRECISION,
  measured_unit TEXT,
  source TEXT,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_device_events_device ON device_events(device_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_scheduler_slots_scheduler ON scheduler_slots(scheduler_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_devices_microcontroller ON devices(microcontroller_id);"#)
        .execute(pool)
        .await?;

    Ok(())
}
