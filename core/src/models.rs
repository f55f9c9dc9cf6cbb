use chrono::{DateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::enums::{
    DeviceEventName, DeviceMode, SchedulerCommandAction, SchedulerCommandStatus,
    SchedulerDayOfWeek,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Microcontroller {
    pub id: i64,
    pub uuid: Uuid,
    pub enabled: bool,
    pub power_provider_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: i64,
    pub uuid: Uuid,
    pub microcontroller_id: i64,
    pub scheduler_id: Option<i64>,
    pub device_number: i32,
    pub mode: DeviceMode,
    pub manual_state: Option<bool>,
    pub last_state_change_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
}

/// `start_time`/`end_time` are the user's local-wall-clock strings kept for
/// display; `start_utc_time`/`end_utc_time` are authoritative for planning.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSlot {
    pub id: i64,
    pub scheduler_id: i64,
    pub day_of_week: SchedulerDayOfWeek,
    pub start_time: String,
    pub end_time: String,
    pub start_utc_time: Option<NaiveTime>,
    pub end_utc_time: Option<NaiveTime>,
    pub use_power_threshold: bool,
    pub power_provider_id: Option<i64>,
    pub power_threshold_value: Option<f64>,
    pub power_threshold_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    pub id: i64,
    pub unit: Option<String>,
    pub expected_interval_sec: Option<i64>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMeasurement {
    pub id: i64,
    pub provider_id: i64,
    pub measured_at: DateTime<Utc>,
    pub measured_value: Option<f64>,
    pub measured_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerCommand {
    pub command_id: Uuid,
    pub device_id: i64,
    pub microcontroller_id: i64,
    pub slot_id: i64,
    pub action: SchedulerCommandAction,
    pub minute_key: DateTime<Utc>,
    pub status: SchedulerCommandStatus,
    pub attempt: i32,
    pub ack_deadline_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub trigger_reason: String,
    pub measured_value: Option<f64>,
    pub measured_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub id: i64,
    pub device_id: i64,
    pub event_name: DeviceEventName,
    pub trigger_reason: Option<String>,
    pub pin_state: Option<bool>,
    pub measured_value: Option<f64>,
    pub measured_unit: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}
