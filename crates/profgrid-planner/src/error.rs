//! Planner error types.

use thiserror::Error;

/// Errors raised by the aggregation-window planner.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("policy fetch failed: {0}")]
    PolicyFetch(String),

    #[error("window sink error: {0}")]
    Sink(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] profgrid_scheduler::SchedulerError),
}

pub type PlannerResult<T> = Result<T, PlannerError>;
