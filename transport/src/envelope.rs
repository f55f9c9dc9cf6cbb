//! Envelope shape: every outbound message is wrapped in the same
//! subject/event_type/event_id/source/entity/timestamp/data_version/data
//! shell; only `data` varies by message kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SOURCE: &str = "smart-schedulers";
pub const DATA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub subject: String,
    pub event_type: String,
    pub event_id: String,
    pub source: String,
    pub entity_type: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub data_version: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub device_id: i64,
    pub device_uuid: Uuid,
    pub device_number: i32,
    pub mode: String,
    pub command: String,
    pub is_on: bool,
    pub command_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckPayload {
    pub command_id: Option<Uuid>,
    #[serde(default)]
    pub ok: bool,
    pub actual_state: Option<bool>,
    pub is_on: Option<bool>,
}

impl AckPayload {
    /// `actual_state` takes precedence over `is_on`; the first present
    /// boolean wins. Both present is legal — `actual_state` silently wins,
    /// no warning.
    pub fn resolved_state(&self) -> Option<bool> {
        self.actual_state.or(self.is_on)
    }
}

pub fn build_command_envelope(
    subject: String,
    ack_subject: String,
    microcontroller_uuid: Uuid,
    data: CommandPayload,
) -> EventEnvelope<CommandPayload> {
    EventEnvelope {
        event_type: crate::subjects::event_type().to_string(),
        event_id: Uuid::new_v4().simple().to_string(),
        source: SOURCE.to_string(),
        entity_type: crate::subjects::entity_type().to_string(),
        entity_id: microcontroller_uuid.to_string(),
        timestamp: Utc::now(),
        data_version: DATA_VERSION.to_string(),
        data,
        ack_subject: Some(ack_subject),
        subject,
    }
}

/// Parses an inbound ack message body. Returns `None` (rather than an error)
/// on any structural mismatch — the caller logs and drops malformed payloads
/// rather than propagating a parse error.
pub fn parse_ack_envelope(raw: &[u8]) -> Option<EventEnvelope<AckPayload>> {
    serde_json::from_slice(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actual_state_takes_precedence_over_is_on() {
        let ack = AckPayload {
            command_id: Some(Uuid::new_v4()),
            ok: true,
            actual_state: Some(true),
            is_on: Some(false),
        };
        assert_eq!(ack.resolved_state(), Some(true));
    }

    #[test]
    fn is_on_used_when_actual_state_absent() {
        let ack = AckPayload {
            command_id: Some(Uuid::new_v4()),
            ok: true,
            actual_state: None,
            is_on: Some(false),
        };
        assert_eq!(ack.resolved_state(), Some(false));
    }

    #[test]
    fn neither_present_resolves_to_none() {
        let ack = AckPayload {
            command_id: Some(Uuid::new_v4()),
            ok: true,
            actual_state: None,
            is_on: None,
        };
        assert_eq!(ack.resolved_state(), None);
    }

    #[test]
    fn malformed_json_parses_to_none() {
        assert!(parse_ack_envelope(b"not json").is_none());
    }

    #[test]
    fn command_envelope_round_trips_through_json() {
        let payload = CommandPayload {
            device_id: 1,
            device_uuid: Uuid::new_v4(),
            device_number: 2,
            mode: "SCHEDULE".to_string(),
            command: "ON".to_string(),
            is_on: true,
            command_id: Uuid::new_v4(),
        };
        let envelope = build_command_envelope(
            "s.mc.command.device.command".to_string(),
            "s.mc.command.device.command.ack".to_string(),
            Uuid::new_v4(),
            payload,
        );
        let json = serde_json::to_vec(&envelope).unwrap();
        let parsed: EventEnvelope<CommandPayload> = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.data.command, "ON");
        assert_eq!(parsed.data_version, DATA_VERSION);
    }
}
