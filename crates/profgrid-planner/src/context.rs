//! Per-process-group scheduling context.
//!
//! Tracks the recorders that poll for this process group (the healthy
//! census feeding coverage targeting) and holds the current window's
//! work-assignment schedule for handout. The planner swaps the schedule
//! in and out at rotation boundaries; the poll surface reads it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use profgrid_scheduler::WorkAssignmentSchedule;
use profgrid_state::{ProcessGroup, WorkAssignment};

/// Shared context between one process group's planner and the poll surface.
pub struct ProcessGroupContext {
    process_group: ProcessGroup,
    /// Recorders silent longer than this are excluded from the census.
    recorder_defunct_threshold_secs: u64,
    /// Recorder identity → last poll time (epoch seconds).
    recorders: Mutex<HashMap<String, u64>>,
    /// The live window's schedule, if a window is active.
    schedule: RwLock<Option<Arc<WorkAssignmentSchedule>>>,
}

impl ProcessGroupContext {
    pub fn new(process_group: ProcessGroup, recorder_defunct_threshold_secs: u64) -> Self {
        Self {
            process_group,
            recorder_defunct_threshold_secs,
            recorders: Mutex::new(HashMap::new()),
            schedule: RwLock::new(None),
        }
    }

    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    /// Note a recorder poll, keeping it in the healthy census.
    pub fn observe_recorder(&self, recorder_id: &str, now: u64) {
        let mut recorders = lock(&self.recorders);
        recorders.insert(recorder_id.to_string(), now);
    }

    /// Recorders seen within the defunct threshold.
    pub fn healthy_recorder_count(&self, now: u64) -> u32 {
        let recorders = lock(&self.recorders);
        recorders
            .values()
            .filter(|last| now.saturating_sub(**last) <= self.recorder_defunct_threshold_secs)
            .count() as u32
    }

    /// Target recorder count for a coverage percentage. Integer
    /// truncation: low coverage on a small census may yield zero,
    /// which is accepted, not an error.
    pub fn target_recorder_count(&self, coverage_pct: u32, now: u64) -> u32 {
        coverage_pct * self.healthy_recorder_count(now) / 100
    }

    /// Swap the live schedule (Some at window start, None at expiry).
    pub fn update_schedule(&self, schedule: Option<Arc<WorkAssignmentSchedule>>) {
        let mut current = match self.schedule.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = schedule;
    }

    /// Hand the next pending assignment to a polling recorder.
    /// `None` when no window is active or the schedule is exhausted —
    /// a normal empty poll, not an error.
    pub fn next_assignment(&self) -> Option<WorkAssignment> {
        let schedule = match self.schedule.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        schedule.as_ref()?.fetch_next()
    }
}

fn lock<'a>(
    recorders: &'a Mutex<HashMap<String, u64>>,
) -> std::sync::MutexGuard<'a, HashMap<String, u64>> {
    match recorders.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profgrid_scheduler::ScheduleConfig;
    use profgrid_state::WorkSpec;

    fn context() -> ProcessGroupContext {
        ProcessGroupContext::new(ProcessGroup::new("app", "cluster", "proc"), 120)
    }

    #[test]
    fn census_counts_only_recent_recorders() {
        let ctx = context();
        ctx.observe_recorder("r1", 1000);
        ctx.observe_recorder("r2", 1100);

        assert_eq!(ctx.healthy_recorder_count(1100), 2);
        // r1 is 180s silent at t=1180, past the 120s threshold.
        assert_eq!(ctx.healthy_recorder_count(1180), 1);
    }

    #[test]
    fn repeat_polls_refresh_the_census() {
        let ctx = context();
        ctx.observe_recorder("r1", 1000);
        ctx.observe_recorder("r1", 1500);
        assert_eq!(ctx.healthy_recorder_count(1600), 1);
    }

    #[test]
    fn coverage_targeting_truncates() {
        let ctx = context();
        for i in 0..5 {
            ctx.observe_recorder(&format!("r{i}"), 1000);
        }
        assert_eq!(ctx.target_recorder_count(100, 1000), 5);
        assert_eq!(ctx.target_recorder_count(50, 1000), 2);
        // 10% of 5 truncates to zero — accepted.
        assert_eq!(ctx.target_recorder_count(10, 1000), 0);
    }

    #[test]
    fn assignment_handout_follows_the_live_schedule() {
        let ctx = context();
        assert!(ctx.next_assignment().is_none());

        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        let drafts = vec![WorkAssignment {
            work_id: 7,
            work: vec![WorkSpec::Monitor { max_frames: 16 }],
            description: "t".to_string(),
            duration_secs: 0,
            delay_secs: 0,
            issued_at: 0,
        }];
        let schedule = WorkAssignmentSchedule::new(&config, drafts, 60).unwrap();
        ctx.update_schedule(Some(Arc::new(schedule)));

        assert_eq!(ctx.next_assignment().unwrap().work_id, 7);
        assert!(ctx.next_assignment().is_none());

        ctx.update_schedule(None);
        assert!(ctx.next_assignment().is_none());
    }
}
