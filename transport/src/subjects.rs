//! Subject naming, ported from `event_helpers.py`'s `subject_for_entity` /
//! `ack_subject_for_entity`. Every device command and its ack live on the
//! same entity-scoped subject tree, keyed by the microcontroller's uuid.

const ENTITY_TYPE: &str = "microcontroller";
const EVENT_TYPE: &str = "device.command";

pub fn entity_type() -> &'static str {
    ENTITY_TYPE
}

pub fn event_type() -> &'static str {
    EVENT_TYPE
}

/// `"{stream}.{microcontroller_uuid}.command.device.command"`
pub fn command_subject(stream: &str, microcontroller_uuid: &str) -> String {
    format!("{stream}.{microcontroller_uuid}.command.{EVENT_TYPE}")
}

/// `"{command_subject}.ack"`
pub fn ack_subject(stream: &str, microcontroller_uuid: &str) -> String {
    format!("{}.ack", command_subject(stream, microcontroller_uuid))
}

/// `"{stream}.*.command.device.command.ack"` — the wildcard the ACK consumer
/// subscribes to once for every microcontroller.
pub fn ack_wildcard_subject(stream: &str) -> String {
    format!("{stream}.*.command.{EVENT_TYPE}.ack")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_subject_has_expected_format() {
        assert_eq!(
            command_subject("device_communication", "mc-1"),
            "device_communication.mc-1.command.device.command"
        );
    }

    #[test]
    fn ack_subject_appends_ack_suffix() {
        assert_eq!(
            ack_subject("device_communication", "mc-1"),
            "device_communication.mc-1.command.device.command.ack"
        );
    }

    #[test]
    fn wildcard_subject_matches_any_microcontroller() {
        let wildcard = ack_wildcard_subject("device_communication");
        assert_eq!(wildcard, "device_communication.*.command.device.command.ack");
    }
}
