//! Aggregation windows and the finalization boundary.

use profgrid_state::ProcessGroup;

use crate::error::PlannerResult;

/// One live aggregation window: the fixed-duration epoch during which
/// profiling data from the assigned recorders accumulates as a unit.
/// Exactly one instance is live per process group at any time.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationWindow {
    pub process_group: ProcessGroup,
    /// Unix timestamp (seconds) when the window opened.
    pub started_at: u64,
    pub duration_secs: u32,
    /// Work ids issued for this window.
    pub work_ids: Vec<u64>,
}

/// An expired window, handed to the aggregation/serialization pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedWindow {
    pub process_group: ProcessGroup,
    pub started_at: u64,
    /// Unix timestamp (seconds) when the window was expired.
    pub ended_at: u64,
    pub duration_secs: u32,
    pub work_ids: Vec<u64>,
}

/// Boundary to the profile aggregation/serialization pipeline.
///
/// A sink failure never prevents the planner from releasing the
/// window's slots — finalization errors are logged and dropped.
pub trait WindowSink: Send + Sync {
    fn finalize(&self, window: FinalizedWindow) -> PlannerResult<()>;
}

/// Sink that drops finalized windows. Used where no aggregation
/// pipeline is attached.
pub struct DiscardSink;

impl WindowSink for DiscardSink {
    fn finalize(&self, _window: FinalizedWindow) -> PlannerResult<()> {
        Ok(())
    }
}
