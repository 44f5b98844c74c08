use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job store call failed (claim, heartbeat, reschedule, stop).
    #[error("Store error: {0}")]
    Store(#[from] cronfleet_store::StoreError),

    /// The cron expression could not be parsed.
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
