//! profgrid-scheduler — admission control and work staggering.
//!
//! Three pieces sit under this crate:
//!
//! - [`SlotPool`] — a fixed-capacity admission-control resource that
//!   bounds how much concurrent recording work one backend will carry.
//!   All-or-nothing grants, idempotent release.
//! - [`WorkAssignmentSchedule`] — given a validated [`ScheduleConfig`]
//!   and a batch of drafted assignments, staggers their start delays so
//!   concurrency stays bounded and every assignment finishes before the
//!   window-end tolerance.
//! - [`WorkIdGenerator`] — per-backend-instance monotonic work-id
//!   minting (backend id in the high 32 bits), injected at construction
//!   so multiple backends can coexist in one test process.

pub mod error;
pub mod schedule;
pub mod slot_pool;
pub mod work_id;

pub use error::{SchedulerError, SchedulerResult};
pub use schedule::{ScheduleConfig, WorkAssignmentSchedule};
pub use slot_pool::{Slot, SlotPool};
pub use work_id::WorkIdGenerator;
