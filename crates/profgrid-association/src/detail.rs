//! Per-backend bookkeeping for the association registry.

use std::collections::HashSet;

use profgrid_state::{BackendRecord, ProcessGroup};

/// In-memory record of one reporting backend.
///
/// `last_reported_at` starts at epoch zero so a backend is defunct
/// until its first load report arrives — including after a leader
/// restart, when records are reloaded without report timing.
#[derive(Debug, Clone)]
pub struct BackendDetail {
    pub address: String,
    pub last_reported_load: Option<f64>,
    pub last_reported_tick: u64,
    /// Unix timestamp (seconds) of the last load report; 0 = never.
    pub last_reported_at: u64,
    /// Process groups currently delegated to this backend.
    pub associated: HashSet<ProcessGroup>,
    /// Delegations made since the backend's previous load report.
    /// Drained and returned by the next report.
    pub pending_delegations: HashSet<ProcessGroup>,
}

impl BackendDetail {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            last_reported_load: None,
            last_reported_tick: 0,
            last_reported_at: 0,
            associated: HashSet::new(),
            pending_delegations: HashSet::new(),
        }
    }

    /// Rebuild from a persisted record. Report timing is not persisted,
    /// so a reloaded backend is defunct until it reports again.
    pub fn from_record(record: BackendRecord) -> Self {
        Self {
            address: record.address,
            last_reported_load: None,
            last_reported_tick: 0,
            last_reported_at: 0,
            associated: record.associated,
            pending_delegations: HashSet::new(),
        }
    }

    /// Record a load report and drain the pending-delegation diff.
    pub fn report_load(&mut self, load: f64, tick: u64, now: u64) -> Vec<ProcessGroup> {
        self.last_reported_load = Some(load);
        self.last_reported_tick = tick;
        self.last_reported_at = now;
        self.pending_delegations.drain().collect()
    }

    /// Delegate a process group to this backend.
    pub fn associate(&mut self, process_group: ProcessGroup) {
        self.pending_delegations.insert(process_group.clone());
        self.associated.insert(process_group);
    }

    /// Withdraw a process group from this backend.
    pub fn dissociate(&mut self, process_group: &ProcessGroup) {
        self.associated.remove(process_group);
        self.pending_delegations.remove(process_group);
    }

    /// Whether this backend has exceeded its report-skip tolerance.
    /// Pure in `now` so callers control the clock.
    pub fn is_defunct(&self, now: u64, reporting_frequency_secs: u64, max_allowed_skips: u32) -> bool {
        now.saturating_sub(self.last_reported_at)
            > reporting_frequency_secs * (u64::from(max_allowed_skips) + 1)
    }

    /// The durable slice of this detail.
    pub fn to_record(&self) -> BackendRecord {
        BackendRecord {
            address: self.address.clone(),
            associated: self.associated.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(name: &str) -> ProcessGroup {
        ProcessGroup::new("app", "cluster", name)
    }

    #[test]
    fn defunct_until_first_report() {
        let detail = BackendDetail::new("10.0.0.1:8080");
        assert!(detail.is_defunct(1000, 10, 2));
    }

    #[test]
    fn report_clears_defunct_state() {
        let mut detail = BackendDetail::new("10.0.0.1:8080");
        detail.report_load(0.4, 1, 1000);
        assert!(!detail.is_defunct(1000, 10, 2));
        // Within tolerance: freq 10s, 2 skips allowed → 30s grace.
        assert!(!detail.is_defunct(1030, 10, 2));
        // Past tolerance.
        assert!(detail.is_defunct(1031, 10, 2));
    }

    #[test]
    fn defunct_backend_recovers_on_next_report() {
        let mut detail = BackendDetail::new("10.0.0.1:8080");
        detail.report_load(0.4, 1, 1000);
        assert!(detail.is_defunct(2000, 10, 2));
        detail.report_load(0.5, 2, 2000);
        assert!(!detail.is_defunct(2000, 10, 2));
    }

    #[test]
    fn report_drains_pending_delegations_once() {
        let mut detail = BackendDetail::new("10.0.0.1:8080");
        detail.associate(pg("p1"));
        detail.associate(pg("p2"));

        let delegated = detail.report_load(0.1, 1, 1000);
        assert_eq!(delegated.len(), 2);

        // Diff, not the full set: a second report returns nothing new.
        let delegated = detail.report_load(0.1, 2, 1010);
        assert!(delegated.is_empty());
        assert_eq!(detail.associated.len(), 2);
    }

    #[test]
    fn dissociate_removes_from_both_sets() {
        let mut detail = BackendDetail::new("10.0.0.1:8080");
        detail.associate(pg("p1"));
        detail.dissociate(&pg("p1"));

        assert!(detail.associated.is_empty());
        assert!(detail.report_load(0.1, 1, 1000).is_empty());
    }

    #[test]
    fn reloaded_record_is_defunct_with_associations_intact() {
        let mut original = BackendDetail::new("10.0.0.1:8080");
        original.report_load(0.1, 1, 1000);
        original.associate(pg("p1"));

        let reloaded = BackendDetail::from_record(original.to_record());
        assert!(reloaded.is_defunct(1000, 10, 2));
        assert!(reloaded.associated.contains(&pg("p1")));
    }
}
