pub mod envelope;
pub mod nats;
pub mod subjects;

pub use envelope::{AckPayload, CommandPayload, EventEnvelope, build_command_envelope, parse_ack_envelope};
pub use nats::{NatsTransport, Subscription, Transport};
