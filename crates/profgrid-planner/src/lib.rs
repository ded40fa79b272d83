//! profgrid-planner — per-process-group aggregation-window control loop.
//!
//! One planner runs per process group delegated to a backend. On a fixed
//! period it rotates the aggregation window: finalize and release the
//! old one, then — if the recording policy fetched ahead of time is
//! relevant to the new window index — synthesize staggered work
//! assignments, bill the slot pool for peak concurrency, and register
//! the new window's work ids for recorder polls.
//!
//! # Architecture
//!
//! ```text
//! Planner (tokio task: rotation interval + lead-time policy fetch + shutdown)
//!   └── PlannerCore (synchronous state machine, all lifecycle mutations)
//!       ├── WorkAssignmentSchedule (stagger + peak concurrency)
//!       ├── SlotPool (admission)
//!       ├── WindowLookup (work id → live window)
//!       ├── ProcessGroupContext (recorder census + schedule handout)
//!       └── WindowSink (finalized-window hook to aggregation)
//! ```

pub mod context;
pub mod core;
pub mod error;
pub mod lookup;
pub mod planner;
pub mod weight;
pub mod window;

pub use context::ProcessGroupContext;
pub use crate::core::{PlannerCore, PlannerState, RotationOutcome, SkipReason};
pub use error::{PlannerError, PlannerResult};
pub use lookup::WindowLookup;
pub use planner::{Planner, PolicyFuture, PolicySource};
pub use weight::slot_weight;
pub use window::{AggregationWindow, FinalizedWindow, WindowSink};
