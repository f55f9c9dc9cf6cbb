//! Exercises `SqlxSchedulerRepository` against an in-memory SQLite `AnyPool`
//! (`sqlite:file:{uuid}?mode=memory&cache=shared`) so CAS claim/ack/timeout
//! behavior is covered without a live Postgres instance.

use chrono::{TimeZone, Utc};
use scheduler_core::{SchedulerCommandAction, SchedulerCommandStatus, SchedulerDayOfWeek};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use store::{SchedulerCommandRepository, SchedulerRuntimeRepository, SqlxSchedulerRepository};
use uuid::Uuid;

async fn test_pool() -> AnyPool {
    sqlx::any::install_default_drivers();
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect in-memory sqlite");
    store::schema::migrate(&pool).await.expect("migrate schema");
    pool
}

async fn seed_microcontroller(pool: &AnyPool, mc_id: i64) {
    let mc_uuid = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO microcontrollers (id, uuid, enabled, power_provider_id) VALUES (?, ?, true, NULL)")
        .bind(mc_id)
        .bind(&mc_uuid)
        .execute(pool)
        .await
        .unwrap();
}

/// Seeds a microcontroller, scheduler, device (in `SCHEDULE` mode), and a
/// single Monday 08:00-09:00 slot. `mc_id` must not already exist in `pool`.
async fn seed_device_on_schedule(pool: &AnyPool, mc_id: i64, device_id: i64, scheduler_id: i64, slot_id: i64) {
    seed_microcontroller(pool, mc_id).await;
    seed_device_for_microcontroller(pool, mc_id, device_id, scheduler_id, slot_id).await;
}

async fn seed_device_for_microcontroller(
    pool: &AnyPool,
    mc_id: i64,
    device_id: i64,
    scheduler_id: i64,
    slot_id: i64,
) {
    let device_uuid = Uuid::new_v4().to_string();

    sqlx::query("INSERT INTO schedulers (id, name, user_id) VALUES (?, 'test', 1)")
        .bind(scheduler_id)
        .execute(pool)
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO devices (id, uuid, microcontroller_id, scheduler_id, device_number, mode, manual_state, last_state_change_at) \
         VALUES (?, ?, ?, ?, 1, 'SCHEDULE', NULL, NULL)",
    )
    .bind(device_id)
    .bind(&device_uuid)
    .bind(mc_id)
    .bind(scheduler_id)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO scheduler_slots \
         (id, scheduler_id, day_of_week, start_time, end_time, start_utc_time, end_utc_time, use_power_threshold, power_provider_id, power_threshold_value, power_threshold_unit) \
         VALUES (?, ?, 'MON', '08:00', '09:00', '08:00', '09:00', false, NULL, NULL, NULL)",
    )
    .bind(slot_id)
    .bind(scheduler_id)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn fetch_due_entries_returns_matching_slot() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);

    let entries = repo
        .fetch_due_entries(SchedulerDayOfWeek::Mon, "08:00", 10, 0)
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].device_id, 10);
    assert_eq!(entries[0].slot_id, 1000);
}

#[tokio::test]
async fn fetch_due_entries_ignores_other_times_and_days() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);

    let wrong_time = repo
        .fetch_due_entries(SchedulerDayOfWeek::Mon, "09:00", 10, 0)
        .await
        .unwrap();
    assert!(wrong_time.is_empty());

    let wrong_day = repo
        .fetch_due_entries(SchedulerDayOfWeek::Tue, "08:00", 10, 0)
        .await
        .unwrap();
    assert!(wrong_day.is_empty());
}

#[tokio::test]
async fn enqueue_command_suppresses_duplicate_for_same_minute_and_action() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    let first = repo
        .enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();
    let second = repo
        .enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn enqueue_command_allows_reenqueue_after_prior_attempt_goes_terminal() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    assert!(
        repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
            .await
            .unwrap()
    );

    let claimed = repo
        .claim_pending_for_dispatch(Utc::now(), 10, 3, 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let command_id = claimed[0].command.command_id;

    repo.mark_ack(command_id, true, Some(true), Utc::now())
        .await
        .unwrap();

    assert!(
        repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn claim_pending_for_dispatch_respects_inflight_cap_per_microcontroller() {
    let pool = test_pool().await;
    seed_microcontroller(&pool, 1).await;
    seed_device_for_microcontroller(&pool, 1, 10, 100, 1000).await;
    seed_device_for_microcontroller(&pool, 1, 11, 101, 1001).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();
    repo.enqueue_command(11, 1, 1001, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();

    let claimed = repo
        .claim_pending_for_dispatch(Utc::now(), 10, 3, 1)
        .await
        .unwrap();

    assert_eq!(claimed.len(), 1, "only one command per microcontroller may be in flight at once");
}

#[tokio::test]
async fn claim_pending_for_dispatch_does_not_double_claim() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();

    let first = repo.claim_pending_for_dispatch(Utc::now(), 10, 3, 10).await.unwrap();
    let second = repo.claim_pending_for_dispatch(Utc::now(), 10, 3, 10).await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test]
async fn mark_ack_is_idempotent_once_terminal() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();
    let claimed = repo.claim_pending_for_dispatch(Utc::now(), 10, 3, 10).await.unwrap();
    let command_id = claimed[0].command.command_id;

    let first = repo.mark_ack(command_id, true, Some(true), Utc::now()).await.unwrap();
    assert!(first.changed);
    assert_eq!(first.command.unwrap().status, SchedulerCommandStatus::AckOk);

    let second = repo.mark_ack(command_id, false, Some(false), Utc::now()).await.unwrap();
    assert!(!second.changed, "an ack for an already-terminal command must not mutate state");
    assert_eq!(second.command.unwrap().status, SchedulerCommandStatus::AckOk);
}

#[tokio::test]
async fn mark_ack_for_unknown_command_reports_no_command() {
    let pool = test_pool().await;
    let repo = SqlxSchedulerRepository::new(pool);

    let outcome = repo
        .mark_ack(Uuid::new_v4(), true, Some(true), Utc::now())
        .await
        .unwrap();

    assert!(outcome.command.is_none());
    assert!(!outcome.changed);
}

#[tokio::test]
async fn claim_timeouts_reaps_expired_inflight_commands_without_retry() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();
    // ack_timeout_sec = 0 so the deadline is already in the past.
    let claimed = repo.claim_pending_for_dispatch(Utc::now(), 10, 0, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let timed_out = repo.claim_timeouts(Utc::now(), 10).await.unwrap();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].status, SchedulerCommandStatus::AckFail);
    assert_eq!(timed_out[0].attempt, 1, "timeouts do not bump attempt further than the original claim");
}

#[tokio::test]
async fn mark_publish_failure_retries_until_max_then_goes_terminal() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);
    let minute = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();

    repo.enqueue_command(10, 1, 1000, SchedulerCommandAction::On, minute, "SCHEDULE_START", None, None)
        .await
        .unwrap();
    let claimed = repo.claim_pending_for_dispatch(Utc::now(), 10, 3, 10).await.unwrap();
    let command_id = claimed[0].command.command_id;

    // max_retry = 1: attempt is 1 after the initial claim, so one retry is granted.
    let first_failure = repo
        .mark_publish_failure(command_id, Utc::now(), 1, 0.01, 0.0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_failure.status, SchedulerCommandStatus::PendingRetry);

    // `attempt` only advances on (re-)claim, never inside mark_publish_failure
    // itself, so the dispatcher's next poll re-claiming this PENDING_RETRY row
    // (bumping attempt to 2) is what exhausts the retry budget.
    let reclaimed = repo
        .claim_pending_for_dispatch(Utc::now() + chrono::Duration::seconds(1), 10, 3, 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].command.attempt, 2);

    let second_failure = repo
        .mark_publish_failure(command_id, Utc::now(), 1, 0.01, 0.0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second_failure.status, SchedulerCommandStatus::AckFail);
}

#[tokio::test]
async fn update_device_state_persists_runtime_change() {
    let pool = test_pool().await;
    seed_device_on_schedule(&pool, 1, 10, 100, 1000).await;
    let repo = SqlxSchedulerRepository::new(pool);

    repo.update_device_state(10, true, Utc::now()).await.unwrap();

    let row: (Option<bool>,) = sqlx::query_as("SELECT manual_state FROM devices WHERE id = ?")
        .bind(10i64)
        .fetch_one(repo.pool())
        .await
        .unwrap();
    assert_eq!(row.0, Some(true));
}
