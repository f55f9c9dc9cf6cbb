pub mod db;
pub mod idempotency;
pub mod repository;
pub mod schema;
pub mod sqlx_repository;

pub use db::Db;
pub use idempotency::{MinuteIdempotencyStore, minute_key};
pub use repository::{MarkAckOutcome, SchedulerCommandRepository, SchedulerRuntimeRepository};
pub use sqlx_repository::SqlxSchedulerRepository;
