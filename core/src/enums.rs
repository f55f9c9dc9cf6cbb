use std::fmt;

/// How a device's pin state is currently being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceMode {
    Manual,
    AutoPower,
    Schedule,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Manual => "MANUAL",
            DeviceMode::AutoPower => "AUTO_POWER",
            DeviceMode::Schedule => "SCHEDULE",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matches Postgres/SQLite's stored weekday string; `Mon = 0` ordering isn't
/// relied upon anywhere, only the variant identity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SchedulerDayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl SchedulerDayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerDayOfWeek::Mon => "MON",
            SchedulerDayOfWeek::Tue => "TUE",
            SchedulerDayOfWeek::Wed => "WED",
            SchedulerDayOfWeek::Thu => "THU",
            SchedulerDayOfWeek::Fri => "FRI",
            SchedulerDayOfWeek::Sat => "SAT",
            SchedulerDayOfWeek::Sun => "SUN",
        }
    }

    /// `chrono::Weekday` uses Mon=0..Sun=6, same ordering as this enum.
    pub fn from_chrono(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => SchedulerDayOfWeek::Mon,
            chrono::Weekday::Tue => SchedulerDayOfWeek::Tue,
            chrono::Weekday::Wed => SchedulerDayOfWeek::Wed,
            chrono::Weekday::Thu => SchedulerDayOfWeek::Thu,
            chrono::Weekday::Fri => SchedulerDayOfWeek::Fri,
            chrono::Weekday::Sat => SchedulerDayOfWeek::Sat,
            chrono::Weekday::Sun => SchedulerDayOfWeek::Sun,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "MON" => SchedulerDayOfWeek::Mon,
            "TUE" => SchedulerDayOfWeek::Tue,
            "WED" => SchedulerDayOfWeek::Wed,
            "THU" => SchedulerDayOfWeek::Thu,
            "FRI" => SchedulerDayOfWeek::Fri,
            "SAT" => SchedulerDayOfWeek::Sat,
            "SUN" => SchedulerDayOfWeek::Sun,
            _ => return None,
        })
    }
}

impl fmt::Display for SchedulerDayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SchedulerCommandAction {
    On,
    Off,
}

impl SchedulerCommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerCommandAction::On => "ON",
            SchedulerCommandAction::Off => "OFF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ON" => Some(SchedulerCommandAction::On),
            "OFF" => Some(SchedulerCommandAction::Off),
            _ => None,
        }
    }
}

impl fmt::Display for SchedulerCommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command status machine: `PENDING -> IN_FLIGHT -> {ACK_OK | ACK_FAIL |
/// PENDING_RETRY -> IN_FLIGHT | ACK_FAIL}`. ACK_OK/ACK_FAIL are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SchedulerCommandStatus {
    Pending,
    InFlight,
    PendingRetry,
    AckOk,
    AckFail,
}

impl SchedulerCommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerCommandStatus::Pending => "PENDING",
            SchedulerCommandStatus::InFlight => "IN_FLIGHT",
            SchedulerCommandStatus::PendingRetry => "PENDING_RETRY",
            SchedulerCommandStatus::AckOk => "ACK_OK",
            SchedulerCommandStatus::AckFail => "ACK_FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => SchedulerCommandStatus::Pending,
            "IN_FLIGHT" => SchedulerCommandStatus::InFlight,
            "PENDING_RETRY" => SchedulerCommandStatus::PendingRetry,
            "ACK_OK" => SchedulerCommandStatus::AckOk,
            "ACK_FAIL" => SchedulerCommandStatus::AckFail,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerCommandStatus::AckOk | SchedulerCommandStatus::AckFail
        )
    }
}

impl fmt::Display for SchedulerCommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceEventName {
    SchedulerTriggerOn,
    DeviceOff,
    SchedulerAckFailed,
    SchedulerSkippedNoPowerData,
    SchedulerSkippedThresholdNotMet,
}

impl DeviceEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceEventName::SchedulerTriggerOn => "SCHEDULER_TRIGGER_ON",
            DeviceEventName::DeviceOff => "DEVICE_OFF",
            DeviceEventName::SchedulerAckFailed => "SCHEDULER_ACK_FAILED",
            DeviceEventName::SchedulerSkippedNoPowerData => "SCHEDULER_SKIPPED_NO_POWER_DATA",
            DeviceEventName::SchedulerSkippedThresholdNotMet => {
                "SCHEDULER_SKIPPED_THRESHOLD_NOT_MET"
            }
        }
    }
}

impl fmt::Display for DeviceEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
