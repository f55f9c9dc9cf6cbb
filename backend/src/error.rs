use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("claim failed: {0}")]
    ClaimFailed(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("scheduler invariant violated: {0}")]
    SchedulerInvariant(String),

    #[error("no workers enabled; enable at least one scheduler component")]
    NoWorkersEnabled,
}
