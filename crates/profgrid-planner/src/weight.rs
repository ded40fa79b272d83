//! Slot weighting per recording policy.
//!
//! Denser sampling costs more backend capacity, so the slot bill for a
//! window is `peak_concurrency × slot_weight(policy)`.

use profgrid_state::{RecordingPolicy, WorkSpec};

/// Sampling at or above this rate counts double.
const DENSE_FREQUENCY_HZ: u32 = 100;

/// Slot cost of one concurrently active work assignment under `policy`.
/// Always at least 1.
pub fn slot_weight(policy: &RecordingPolicy) -> u32 {
    let weight: u32 = policy
        .work
        .iter()
        .map(|spec| match spec {
            WorkSpec::CpuSample { frequency_hz, .. }
            | WorkSpec::ThreadSample { frequency_hz, .. } => {
                if *frequency_hz >= DENSE_FREQUENCY_HZ {
                    2
                } else {
                    1
                }
            }
            WorkSpec::Monitor { .. } => 1,
        })
        .sum();
    weight.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(work: Vec<WorkSpec>) -> RecordingPolicy {
        RecordingPolicy {
            duration_secs: 120,
            coverage_pct: 50,
            description: "test".to_string(),
            work,
        }
    }

    #[test]
    fn sparse_sampling_weighs_one() {
        let p = policy(vec![WorkSpec::CpuSample {
            frequency_hz: 50,
            max_frames: 64,
        }]);
        assert_eq!(slot_weight(&p), 1);
    }

    #[test]
    fn dense_sampling_weighs_double() {
        let p = policy(vec![WorkSpec::CpuSample {
            frequency_hz: 100,
            max_frames: 64,
        }]);
        assert_eq!(slot_weight(&p), 2);
    }

    #[test]
    fn weights_sum_across_work_kinds() {
        let p = policy(vec![
            WorkSpec::CpuSample {
                frequency_hz: 100,
                max_frames: 64,
            },
            WorkSpec::Monitor { max_frames: 16 },
        ]);
        assert_eq!(slot_weight(&p), 3);
    }

    #[test]
    fn empty_work_still_costs_one() {
        let p = policy(Vec::new());
        assert_eq!(slot_weight(&p), 1);
    }
}
