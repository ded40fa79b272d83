//! The synchronous rotation state machine.
//!
//! All window-lifecycle mutations for one process group happen here, in
//! plain methods, driven by the surrounding [`Planner`](crate::Planner)
//! task. The surrounding executor guarantees rotation and policy-fetch
//! callbacks for one process group never run concurrently, so the core
//! needs no internal locking of its own state.

use std::sync::Arc;

use tracing::{error, info, warn};

use profgrid_scheduler::{
    ScheduleConfig, Slot, SlotPool, WorkAssignmentSchedule, WorkIdGenerator,
};
use profgrid_state::{ProcessGroup, RecordingPolicy, WorkAssignment};

use crate::context::ProcessGroupContext;
use crate::lookup::WindowLookup;
use crate::weight::slot_weight;
use crate::window::{AggregationWindow, FinalizedWindow, WindowSink};

/// Planner lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    /// Started, no rotation has run yet.
    Bootstrapping,
    /// A window is live.
    WindowActive,
    /// Rotated into an epoch with no window (skip).
    WindowRotating,
    /// Closed; no further rotations.
    Closed,
}

/// Why an epoch was skipped. A skipped epoch is degraded but safe:
/// no window, no slots consumed, no crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No policy fetch has resolved.
    PolicyNotFetched,
    /// A policy resolved, but for a different window index.
    StalePolicy,
    /// Coverage targeting truncated to zero recorders.
    ZeroTargetRecorders,
    /// The drafted batch cannot be staggered within the window.
    ScheduleInfeasible,
    /// The slot pool could not cover the window's peak concurrency.
    SlotsExhausted,
}

/// What one rotation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOutcome {
    WindowStarted { work_count: usize, slots_held: u32 },
    EpochSkipped(SkipReason),
    Closed,
}

/// A live window together with the resources it holds.
struct ActiveWindow {
    window: Arc<AggregationWindow>,
    slots: Vec<Slot>,
}

/// Per-process-group rotation state machine.
pub struct PlannerCore {
    process_group: ProcessGroup,
    schedule_config: ScheduleConfig,
    slot_pool: Arc<SlotPool>,
    lookup: Arc<WindowLookup>,
    sink: Arc<dyn WindowSink>,
    context: Arc<ProcessGroupContext>,
    work_ids: Arc<WorkIdGenerator>,

    state: PlannerState,
    /// Index of the current window epoch; 0 before the first rotation.
    window_index: u32,
    /// Window index the pending policy was fetched for.
    policy_index: u32,
    /// Policy fetched ahead of the next rotation, if the fetch succeeded.
    pending_policy: Option<RecordingPolicy>,
    current: Option<ActiveWindow>,
}

impl PlannerCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process_group: ProcessGroup,
        schedule_config: ScheduleConfig,
        slot_pool: Arc<SlotPool>,
        lookup: Arc<WindowLookup>,
        sink: Arc<dyn WindowSink>,
        context: Arc<ProcessGroupContext>,
        work_ids: Arc<WorkIdGenerator>,
    ) -> Self {
        Self {
            process_group,
            schedule_config,
            slot_pool,
            lookup,
            sink,
            context,
            work_ids,
            state: PlannerState::Bootstrapping,
            window_index: 0,
            policy_index: 0,
            pending_policy: None,
            current: None,
        }
    }

    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    pub fn schedule_config(&self) -> &ScheduleConfig {
        &self.schedule_config
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn window_index(&self) -> u32 {
        self.window_index
    }

    pub fn has_live_window(&self) -> bool {
        self.current.is_some()
    }

    /// Record the outcome of a policy fetch issued for `window_index`.
    /// A failed fetch still advances the relevance marker (`policy`
    /// None), matching the retry-next-epoch recovery: the epoch is
    /// skipped once and the following lead-time fetch tries again.
    pub fn note_policy(&mut self, window_index: u32, policy: Option<RecordingPolicy>) {
        if self.state == PlannerState::Closed {
            return;
        }
        self.policy_index = window_index;
        self.pending_policy = policy;
    }

    /// Rotate the aggregation window. Fires once per period.
    ///
    /// The expire step runs unconditionally before anything else, so
    /// slots held by the outgoing window are released even when the new
    /// window cannot be built.
    pub fn rotate(&mut self, now: u64) -> RotationOutcome {
        if self.state == PlannerState::Closed {
            return RotationOutcome::Closed;
        }

        self.expire_current();
        self.window_index += 1;

        // Relevance check: only a policy fetched for exactly this epoch
        // may drive it. A stale or missing fetch skips the epoch.
        if self.policy_index != self.window_index {
            // policy_index 0 means no fetch has ever resolved; issued
            // fetches always carry an index of at least 1.
            if self.policy_index == 0 {
                warn!(
                    process_group = %self.process_group,
                    window_index = self.window_index,
                    "skipping epoch: recording policy was not fetched in time"
                );
                self.state = PlannerState::WindowRotating;
                return RotationOutcome::EpochSkipped(SkipReason::PolicyNotFetched);
            }
            warn!(
                process_group = %self.process_group,
                window_index = self.window_index,
                policy_index = self.policy_index,
                "skipping epoch: policy fetched for a different window index"
            );
            self.state = PlannerState::WindowRotating;
            return RotationOutcome::EpochSkipped(SkipReason::StalePolicy);
        }
        let Some(policy) = self.pending_policy.take() else {
            warn!(
                process_group = %self.process_group,
                window_index = self.window_index,
                "skipping epoch: recording policy was not fetched in time"
            );
            self.state = PlannerState::WindowRotating;
            return RotationOutcome::EpochSkipped(SkipReason::PolicyNotFetched);
        };

        match self.setup_window(&policy, now) {
            Ok(outcome) => outcome,
            Err(reason) => {
                self.state = PlannerState::WindowRotating;
                RotationOutcome::EpochSkipped(reason)
            }
        }
    }

    /// Expire the current window and stop. Safe to call repeatedly; the
    /// second and later calls release nothing further.
    pub fn close(&mut self) {
        if self.state == PlannerState::Closed {
            return;
        }
        self.expire_current();
        self.state = PlannerState::Closed;
        info!(process_group = %self.process_group, "planner closed");
    }

    // ── Internal ────────────────────────────────────────────────────

    fn setup_window(
        &mut self,
        policy: &RecordingPolicy,
        now: u64,
    ) -> Result<RotationOutcome, SkipReason> {
        let target = self.context.target_recorder_count(policy.coverage_pct, now);
        if target == 0 {
            info!(
                process_group = %self.process_group,
                window_index = self.window_index,
                coverage_pct = policy.coverage_pct,
                "skipping epoch: coverage target truncated to zero recorders"
            );
            return Err(SkipReason::ZeroTargetRecorders);
        }

        let drafts: Vec<WorkAssignment> = (0..target)
            .map(|_| WorkAssignment {
                work_id: self.work_ids.next_id(),
                work: policy.work.clone(),
                description: policy.description.clone(),
                duration_secs: policy.duration_secs,
                delay_secs: 0,
                issued_at: 0,
            })
            .collect();

        let schedule =
            match WorkAssignmentSchedule::new(&self.schedule_config, drafts, policy.duration_secs) {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!(
                        process_group = %self.process_group,
                        window_index = self.window_index,
                        error = %e,
                        "skipping epoch: schedule construction failed"
                    );
                    return Err(SkipReason::ScheduleInfeasible);
                }
            };

        let required = schedule.peak_concurrency() * slot_weight(policy);
        let slots = match self.slot_pool.acquire(required) {
            Ok(slots) => slots,
            Err(e) => {
                warn!(
                    process_group = %self.process_group,
                    window_index = self.window_index,
                    error = %e,
                    "skipping epoch: slot pool could not cover the window"
                );
                return Err(SkipReason::SlotsExhausted);
            }
        };

        let window = Arc::new(AggregationWindow {
            process_group: self.process_group.clone(),
            started_at: now,
            duration_secs: self.schedule_config.window_secs(),
            work_ids: schedule.work_ids(),
        });
        self.lookup.register(&window);
        self.context.update_schedule(Some(Arc::new(schedule)));

        let work_count = window.work_ids.len();
        info!(
            process_group = %self.process_group,
            window_index = self.window_index,
            work_count,
            slots_held = required,
            "aggregation window started"
        );
        self.current = Some(ActiveWindow { window, slots });
        self.state = PlannerState::WindowActive;
        Ok(RotationOutcome::WindowStarted {
            work_count,
            slots_held: required,
        })
    }

    /// Finalize and tear down the live window, if any. Slot release and
    /// lookup cleanup run regardless of sink failure.
    fn expire_current(&mut self) {
        let Some(active) = self.current.take() else {
            return;
        };

        let finalized = FinalizedWindow {
            process_group: active.window.process_group.clone(),
            started_at: active.window.started_at,
            ended_at: active.window.started_at + u64::from(active.window.duration_secs),
            duration_secs: active.window.duration_secs,
            work_ids: active.window.work_ids.clone(),
        };
        if let Err(e) = self.sink.finalize(finalized) {
            error!(
                process_group = %self.process_group,
                error = %e,
                "window finalization failed; releasing slots anyway"
            );
        }

        self.slot_pool.release(active.slots);
        self.lookup.unregister(&active.window.work_ids);
        self.context.update_schedule(None);
    }
}
