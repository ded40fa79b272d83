//! Staggered work-assignment scheduling.
//!
//! A [`WorkAssignmentSchedule`] takes a batch of drafted assignments for
//! one aggregation window and assigns each a start delay so that:
//!
//! - every delay falls inside the acceptable band of the config,
//! - every assignment finishes at least `window_end_tolerance_secs`
//!   before the window closes,
//! - peak concurrency (the slot bill) is knowable up front via
//!   [`WorkAssignmentSchedule::peak_concurrency`].
//!
//! An infeasible combination fails construction rather than silently
//! violating the end tolerance.

use std::sync::Mutex;

use profgrid_state::WorkAssignment;

use crate::error::{SchedulerError, SchedulerResult};

/// Validated timing parameters for building work-assignment schedules.
///
/// The minimum acceptable delay is derived as half the scheduling
/// buffer; construction fails unless the maximum is at least twice the
/// minimum, so no partially-built config can exist.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    window_duration_mins: u32,
    window_end_tolerance_secs: u32,
    scheduling_buffer_secs: u32,
    min_acceptable_delay_secs: u32,
    max_acceptable_delay_secs: u32,
}

impl ScheduleConfig {
    pub fn new(
        window_duration_mins: u32,
        window_end_tolerance_secs: u32,
        scheduling_buffer_secs: u32,
        max_acceptable_delay_secs: u32,
    ) -> SchedulerResult<Self> {
        let min_acceptable_delay_secs = scheduling_buffer_secs / 2;
        if max_acceptable_delay_secs < min_acceptable_delay_secs * 2 {
            return Err(SchedulerError::InvalidConfig(format!(
                "max acceptable delay {max_acceptable_delay_secs}s must be at least twice \
                 the min acceptable delay {min_acceptable_delay_secs}s"
            )));
        }
        Ok(Self {
            window_duration_mins,
            window_end_tolerance_secs,
            scheduling_buffer_secs,
            min_acceptable_delay_secs,
            max_acceptable_delay_secs,
        })
    }

    pub fn window_duration_mins(&self) -> u32 {
        self.window_duration_mins
    }

    pub fn window_secs(&self) -> u32 {
        self.window_duration_mins * 60
    }

    pub fn window_end_tolerance_secs(&self) -> u32 {
        self.window_end_tolerance_secs
    }

    pub fn scheduling_buffer_secs(&self) -> u32 {
        self.scheduling_buffer_secs
    }

    pub fn min_acceptable_delay_secs(&self) -> u32 {
        self.min_acceptable_delay_secs
    }

    pub fn max_acceptable_delay_secs(&self) -> u32 {
        self.max_acceptable_delay_secs
    }
}

/// A time-staggered batch of work assignments for one aggregation window.
///
/// Assignments are handed out to polling recorders in ascending delay
/// order; an exhausted schedule yields `None`, which the poll surface
/// reports as a normal empty response.
pub struct WorkAssignmentSchedule {
    /// Entries sorted by ascending delay.
    entries: Vec<WorkAssignment>,
    peak_concurrency: u32,
    /// Index of the next entry to hand out.
    cursor: Mutex<usize>,
}

impl WorkAssignmentSchedule {
    /// Stagger `drafts` across the window, spreading start delays evenly
    /// over `[min_delay, min(max_delay, window − tolerance − duration)]`.
    pub fn new(
        config: &ScheduleConfig,
        drafts: Vec<WorkAssignment>,
        work_duration_secs: u32,
    ) -> SchedulerResult<Self> {
        let window_secs = config.window_secs();
        // checked_add guards policy-supplied durations near u32::MAX.
        let budget = config
            .window_end_tolerance_secs()
            .checked_add(work_duration_secs)
            .and_then(|reserved| window_secs.checked_sub(reserved))
            .ok_or_else(|| {
                SchedulerError::InfeasibleSchedule(format!(
                    "work duration {work_duration_secs}s plus end tolerance {}s exceeds \
                     the {window_secs}s window",
                    config.window_end_tolerance_secs()
                ))
            })?;

        let min_delay = config.min_acceptable_delay_secs();
        let effective_max = config.max_acceptable_delay_secs().min(budget);
        if effective_max < min_delay {
            return Err(SchedulerError::InfeasibleSchedule(format!(
                "latest feasible start {effective_max}s precedes the minimum \
                 acceptable delay {min_delay}s"
            )));
        }

        let span = effective_max - min_delay;
        let count = drafts.len();
        let mut entries = drafts;
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.delay_secs = if count > 1 {
                min_delay + (span * i as u32) / (count as u32 - 1)
            } else {
                min_delay
            };
            entry.duration_secs = work_duration_secs;
        }

        let peak_concurrency = peak_overlap(&entries, work_duration_secs);

        Ok(Self {
            entries,
            peak_concurrency,
            cursor: Mutex::new(0),
        })
    }

    /// Maximum number of assignments simultaneously active under this
    /// schedule. The caller sizes its slot request from this before
    /// committing to the window.
    pub fn peak_concurrency(&self) -> u32 {
        self.peak_concurrency
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Work ids of every entry in this schedule.
    pub fn work_ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.work_id).collect()
    }

    /// Hand the next unissued assignment to a polling recorder.
    pub fn fetch_next(&self) -> Option<WorkAssignment> {
        let mut cursor = match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = self.entries.get(*cursor)?.clone();
        *cursor += 1;
        Some(entry)
    }

    /// Entries not yet handed out.
    pub fn remaining(&self) -> usize {
        let cursor = match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.entries.len() - *cursor
    }
}

/// Peak number of `[delay, delay + duration)` intervals overlapping at
/// any instant. Quadratic sweep; batch sizes are recorder counts, small.
fn peak_overlap(entries: &[WorkAssignment], duration_secs: u32) -> u32 {
    let mut peak = 0u32;
    for a in entries {
        let active = entries
            .iter()
            .filter(|b| {
                b.delay_secs < a.delay_secs + duration_secs && b.delay_secs >= a.delay_secs
            })
            .count() as u32;
        peak = peak.max(active);
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use profgrid_state::WorkSpec;

    fn draft(work_id: u64) -> WorkAssignment {
        WorkAssignment {
            work_id,
            work: vec![WorkSpec::CpuSample {
                frequency_hz: 50,
                max_frames: 64,
            }],
            description: "test".to_string(),
            duration_secs: 0,
            delay_secs: 0,
            issued_at: 0,
        }
    }

    fn drafts(n: u64) -> Vec<WorkAssignment> {
        (1..=n).map(draft).collect()
    }

    // ── Config validation ──────────────────────────────────────────

    #[test]
    fn config_accepts_max_delay_at_least_twice_min() {
        // min = 120 / 2 = 60; 300 >= 2 * 60.
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        assert_eq!(config.min_acceptable_delay_secs(), 60);
        assert_eq!(config.window_secs(), 1200);
    }

    #[test]
    fn config_rejects_narrow_delay_band() {
        // min = 60; 100 < 2 * 60.
        let result = ScheduleConfig::new(20, 30, 120, 100);
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    // ── Schedule construction ──────────────────────────────────────

    #[test]
    fn delays_fall_within_acceptable_band() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        let schedule = WorkAssignmentSchedule::new(&config, drafts(10), 60).unwrap();

        assert_eq!(schedule.len(), 10);
        let mut last = None;
        while let Some(entry) = schedule.fetch_next() {
            assert!(entry.delay_secs >= config.min_acceptable_delay_secs());
            assert!(entry.delay_secs <= config.max_acceptable_delay_secs());
            // Finishes before window end minus tolerance.
            assert!(
                entry.delay_secs + entry.duration_secs
                    <= config.window_secs() - config.window_end_tolerance_secs()
            );
            // Handed out in ascending delay order.
            if let Some(prev) = last {
                assert!(entry.delay_secs >= prev);
            }
            last = Some(entry.delay_secs);
        }
    }

    #[test]
    fn single_assignment_starts_at_min_delay() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        let schedule = WorkAssignmentSchedule::new(&config, drafts(1), 60).unwrap();
        let entry = schedule.fetch_next().unwrap();
        assert_eq!(entry.delay_secs, 60);
    }

    #[test]
    fn work_longer_than_window_is_infeasible() {
        let config = ScheduleConfig::new(1, 5, 10, 20).unwrap();
        let result = WorkAssignmentSchedule::new(&config, drafts(2), 120);
        assert!(matches!(
            result,
            Err(SchedulerError::InfeasibleSchedule(_))
        ));
    }

    #[test]
    fn absurd_work_duration_is_infeasible_not_panicking() {
        // A duration near u32::MAX must fail construction cleanly
        // instead of overflowing the budget arithmetic.
        let config = ScheduleConfig::new(1, 5, 10, 20).unwrap();
        let result = WorkAssignmentSchedule::new(&config, drafts(2), u32::MAX);
        assert!(matches!(
            result,
            Err(SchedulerError::InfeasibleSchedule(_))
        ));
    }

    #[test]
    fn start_band_collapsing_below_min_delay_is_infeasible() {
        // Window 60s, tolerance 5s, duration 50s: latest start = 5s,
        // but min delay = 120 / 2 ... use buffer 20 → min 10 > 5.
        let config = ScheduleConfig::new(1, 5, 20, 30).unwrap();
        let result = WorkAssignmentSchedule::new(&config, drafts(3), 50);
        assert!(matches!(
            result,
            Err(SchedulerError::InfeasibleSchedule(_))
        ));
    }

    #[test]
    fn spread_reduces_peak_concurrency() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        // Short work spread over a 240s band: far fewer than 24 overlap.
        let schedule = WorkAssignmentSchedule::new(&config, drafts(24), 30).unwrap();
        assert!(schedule.peak_concurrency() >= 1);
        assert!(schedule.peak_concurrency() < 24);
    }

    #[test]
    fn fully_overlapping_work_peaks_at_batch_size() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        // Work as long as the whole delay band: everything overlaps.
        let schedule = WorkAssignmentSchedule::new(&config, drafts(5), 600).unwrap();
        assert_eq!(schedule.peak_concurrency(), 5);
    }

    #[test]
    fn empty_drafts_build_an_empty_schedule() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        let schedule = WorkAssignmentSchedule::new(&config, Vec::new(), 60).unwrap();
        assert!(schedule.is_empty());
        assert_eq!(schedule.peak_concurrency(), 0);
        assert!(schedule.fetch_next().is_none());
    }

    #[test]
    fn handout_exhausts_then_yields_none() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        let schedule = WorkAssignmentSchedule::new(&config, drafts(3), 60).unwrap();

        assert_eq!(schedule.remaining(), 3);
        assert!(schedule.fetch_next().is_some());
        assert!(schedule.fetch_next().is_some());
        assert!(schedule.fetch_next().is_some());
        assert!(schedule.fetch_next().is_none());
        assert_eq!(schedule.remaining(), 0);
    }

    #[test]
    fn work_ids_preserved_through_scheduling() {
        let config = ScheduleConfig::new(20, 30, 120, 300).unwrap();
        let schedule = WorkAssignmentSchedule::new(&config, drafts(4), 60).unwrap();
        assert_eq!(schedule.work_ids(), vec![1, 2, 3, 4]);
    }
}
