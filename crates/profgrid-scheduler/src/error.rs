//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule config: {0}")]
    InvalidConfig(String),

    #[error("infeasible schedule: {0}")]
    InfeasibleSchedule(String),

    #[error("slot pool exhausted: requested {requested}, available {available}")]
    SlotsExhausted { requested: u32, available: u32 },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
