//! Domain types shared across the profgrid control plane.
//!
//! These types cover the persisted state (associations, backend records,
//! recording policies) and the scheduling/wire types consumed by the
//! scheduler, planner, and HTTP surface. All are JSON-serializable for
//! storage in redb tables and for the API payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Backend address in `ip:port` form.
pub type BackendAddress = String;

// ── Process group ─────────────────────────────────────────────────

/// Immutable identity of a monitored process group. Equality is
/// structural; used as a map key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub app_id: String,
    pub cluster: String,
    pub proc_name: String,
}

impl ProcessGroup {
    pub fn new(app_id: &str, cluster: &str, proc_name: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            cluster: cluster.to_string(),
            proc_name: proc_name.to_string(),
        }
    }

    /// Build the composite key for the associations/policies tables.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}", self.app_id, self.cluster, self.proc_name)
    }
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app_id, self.cluster, self.proc_name)
    }
}

// ── Recording policy ──────────────────────────────────────────────

/// One kind of sampling work a recorder can perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkSpec {
    CpuSample { frequency_hz: u32, max_frames: u32 },
    ThreadSample { frequency_hz: u32, max_frames: u32 },
    Monitor { max_frames: u32 },
}

/// Leader-supplied recording parameters for one process group.
///
/// Not owned by this control plane's core — consumed as the primary
/// scheduling input for each aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingPolicy {
    /// How long each recorder runs its assigned work, in seconds.
    pub duration_secs: u32,
    /// Percentage of healthy recorders to target per window (0–100).
    pub coverage_pct: u32,
    /// Human-readable description carried through to recorders.
    pub description: String,
    /// The work each targeted recorder performs.
    pub work: Vec<WorkSpec>,
}

// ── Work assignment ───────────────────────────────────────────────

/// A unit of sampling work issued to one recorder for one window.
///
/// `work_id` packs the issuing backend's id into the high 32 bits and a
/// per-backend monotonic counter into the low 32, so uniqueness needs no
/// cross-backend coordination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub work_id: u64,
    pub work: Vec<WorkSpec>,
    pub description: String,
    pub duration_secs: u32,
    /// Seconds the recorder must wait after receipt before starting.
    pub delay_secs: u32,
    /// Epoch seconds when the assignment was handed to a recorder;
    /// zero until issuance.
    pub issued_at: u64,
}

// ── Backend record ────────────────────────────────────────────────

/// Durable slice of a backend's state: its address and the process
/// groups currently delegated to it. Load/report timing is *not*
/// persisted — a restarted leader treats every backend as defunct
/// until it reports again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRecord {
    pub address: BackendAddress,
    pub associated: HashSet<ProcessGroup>,
}

impl BackendRecord {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            associated: HashSet::new(),
        }
    }
}

// ── Lease ─────────────────────────────────────────────────────────

/// A lease row: single-writer exclusion with an expiry, so a crashed
/// holder never blocks placement forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: String,
    /// Unix timestamp (seconds) after which the lease is reclaimable.
    pub expires_at: u64,
}
