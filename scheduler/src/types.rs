use chrono::{DateTime, NaiveTime, Utc};
use scheduler_core::{DeviceMode, SchedulerCommand, SchedulerCommandAction, SchedulerDayOfWeek};
use uuid::Uuid;

/// One slot matched by the planner's due or end scan, flattened with the
/// fields `decide()` needs so the decision service stays free of any
/// repository/ORM type.
#[derive(Debug, Clone)]
pub struct DueSchedulerEntry {
    pub slot_id: i64,
    pub scheduler_id: i64,
    pub device_id: i64,
    pub microcontroller_id: i64,
    pub day_of_week: SchedulerDayOfWeek,
    pub start_utc_time: Option<NaiveTime>,
    pub end_utc_time: Option<NaiveTime>,
    pub use_power_threshold: bool,
    pub power_provider_id: Option<i64>,
    pub power_threshold_value: Option<f64>,
    pub power_threshold_unit: Option<String>,
    pub action: SchedulerCommandAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    AllowOn,
    SkipNoPowerData,
    SkipThresholdNotMet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub kind: DecisionKind,
    pub trigger_reason: &'static str,
    pub measured_value: Option<f64>,
    pub measured_unit: Option<String>,
}

impl Decision {
    pub fn allow(trigger_reason: &'static str) -> Self {
        Self {
            kind: DecisionKind::AllowOn,
            trigger_reason,
            measured_value: None,
            measured_unit: None,
        }
    }

    pub fn allow_with_measurement(
        trigger_reason: &'static str,
        measured_value: f64,
        measured_unit: String,
    ) -> Self {
        Self {
            kind: DecisionKind::AllowOn,
            trigger_reason,
            measured_value: Some(measured_value),
            measured_unit: Some(measured_unit),
        }
    }

    pub fn skip_no_power_data(trigger_reason: &'static str) -> Self {
        Self {
            kind: DecisionKind::SkipNoPowerData,
            trigger_reason,
            measured_value: None,
            measured_unit: None,
        }
    }

    pub fn skip_threshold_not_met(measured_value: f64, measured_unit: String) -> Self {
        Self {
            kind: DecisionKind::SkipThresholdNotMet,
            trigger_reason: "THRESHOLD_NOT_MET",
            measured_value: Some(measured_value),
            measured_unit: Some(measured_unit),
        }
    }
}

/// Minimal view of a `Provider` row the decision service needs.
#[derive(Debug, Clone)]
pub struct ProviderView {
    pub enabled: bool,
    pub unit: Option<String>,
    pub expected_interval_sec: Option<i64>,
}

/// Minimal view of the latest `ProviderMeasurement` row.
#[derive(Debug, Clone)]
pub struct MeasurementView {
    pub measured_at: DateTime<Utc>,
    pub measured_value: Option<f64>,
    pub measured_unit: Option<String>,
}

/// A command claimed for dispatch, joined with just enough device/microcontroller
/// identity for the dispatcher to build a publish envelope without a second
/// repository round-trip.
#[derive(Debug, Clone)]
pub struct DispatchEntry {
    pub command: SchedulerCommand,
    pub device_uuid: Uuid,
    pub device_number: i32,
    pub mode: DeviceMode,
    pub microcontroller_uuid: Uuid,
}
