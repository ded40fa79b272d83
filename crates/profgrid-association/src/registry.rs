//! The association registry.
//!
//! Single-valued process-group → backend mapping with load-based
//! placement. The in-memory view is authoritative for reads; every
//! mutation is written through to the state store so a restarted leader
//! can rebuild an equivalent view with [`AssociationRegistry::load`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use profgrid_state::{BackendAddress, Lease, ProcessGroup, StateError, StateStore};

use crate::detail::BackendDetail;
use crate::error::{RegistryError, RegistryResult};
use crate::prioritizer::BackendPrioritizer;

/// Name of the placement-exclusion lease row.
const PLACEMENT_LEASE: &str = "placement";

/// Lease lifetime. Long enough for one read-decide-persist sequence,
/// short enough that a crashed holder does not stall placement.
const LEASE_TTL_SECS: u64 = 30;

/// A backend's periodic load report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub ip: String,
    pub port: u16,
    pub load: f64,
    pub tick: u64,
}

impl LoadReport {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// One row of the admin association listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationEntry {
    pub process_group: ProcessGroup,
    pub backend: BackendAddress,
}

/// Leader-side registry of backend ↔ process-group associations.
pub struct AssociationRegistry {
    state: StateStore,
    backends: RwLock<HashMap<BackendAddress, BackendDetail>>,
    associations: RwLock<HashMap<ProcessGroup, BackendAddress>>,
    prioritizer: Box<dyn BackendPrioritizer>,
    reporting_frequency_secs: u64,
    max_allowed_skips: u32,
    /// This leader instance's identity on lease rows.
    lease_holder: String,
    /// Bound on how long a placement waits for the lease before
    /// surfacing a retryable `Unavailable`.
    lease_timeout: Duration,
}

impl AssociationRegistry {
    pub fn new(
        state: StateStore,
        prioritizer: Box<dyn BackendPrioritizer>,
        reporting_frequency_secs: u64,
        max_allowed_skips: u32,
        lease_holder: &str,
    ) -> Self {
        Self {
            state,
            backends: RwLock::new(HashMap::new()),
            associations: RwLock::new(HashMap::new()),
            prioritizer,
            reporting_frequency_secs,
            max_allowed_skips,
            lease_holder: lease_holder.to_string(),
            lease_timeout: Duration::from_secs(5),
        }
    }

    /// Rebuild the in-memory view from the durable store.
    ///
    /// Reloaded backends carry their associations but no report timing,
    /// so each stays defunct until its next load report — placement
    /// never lands on a backend that hasn't reported since the restart.
    pub async fn load(&self) -> RegistryResult<()> {
        let records = self.state.list_backends()?;
        let mut backends = self.backends.write().await;
        let mut associations = self.associations.write().await;
        backends.clear();
        associations.clear();
        for record in records {
            for process_group in &record.associated {
                associations.insert(process_group.clone(), record.address.clone());
            }
            backends.insert(record.address.clone(), BackendDetail::from_record(record));
        }
        info!(
            backends = backends.len(),
            associations = associations.len(),
            "association registry loaded"
        );
        Ok(())
    }

    /// Record a backend's load report.
    ///
    /// Returns the process groups newly delegated to this backend since
    /// its previous report — the diff, not the full set. Backends
    /// discover new work by polling this call.
    pub async fn report_backend_load(
        &self,
        report: &LoadReport,
    ) -> RegistryResult<Vec<ProcessGroup>> {
        let address = report.address();
        let now = epoch_secs();
        let mut backends = self.backends.write().await;

        let detail = match backends.entry(address.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                // First sighting of this backend: persist before admitting.
                let detail = BackendDetail::new(&address);
                self.state.put_backend(&detail.to_record())?;
                info!(%address, "new backend registered");
                entry.insert(detail)
            }
        };

        let delegated = detail.report_load(report.load, report.tick, now);
        debug!(%address, load = report.load, tick = report.tick, newly_delegated = delegated.len(), "load reported");
        Ok(delegated)
    }

    /// Return the backend associated with a process group, placing it on
    /// the best non-defunct backend first if it has none (or its current
    /// holder has gone defunct).
    ///
    /// The decide-and-persist sequence runs under the placement lease;
    /// a caller that loses the race re-reads and observes the winner's
    /// placement instead of double-assigning.
    pub async fn associate_and_get_backend(
        &self,
        process_group: &ProcessGroup,
    ) -> RegistryResult<BackendAddress> {
        // Fast path: existing association to a live backend.
        if let Some(address) = self.healthy_association(process_group).await {
            return Ok(address);
        }

        let lease = self.acquire_placement_lease().await?;
        let result = self.place_locked(process_group).await;
        if let Err(e) = self.state.release_lease(&lease) {
            warn!(error = %e, "failed to release placement lease");
        }
        result
    }

    /// Read-only association lookup.
    pub async fn get_associated_backend(
        &self,
        process_group: &ProcessGroup,
    ) -> Option<BackendAddress> {
        let associations = self.associations.read().await;
        associations.get(process_group).cloned()
    }

    /// Read-only listing of every association.
    pub async fn get_associations(&self) -> Vec<AssociationEntry> {
        let associations = self.associations.read().await;
        associations
            .iter()
            .map(|(process_group, backend)| AssociationEntry {
                process_group: process_group.clone(),
                backend: backend.clone(),
            })
            .collect()
    }

    /// Explicitly de-associate a process group (leader admin surface).
    /// Returns the backend it was associated with.
    pub async fn remove_association(
        &self,
        process_group: &ProcessGroup,
    ) -> RegistryResult<BackendAddress> {
        let mut associations = self.associations.write().await;
        let mut backends = self.backends.write().await;

        let address = associations
            .remove(process_group)
            .ok_or_else(|| RegistryError::UnknownProcessGroup(process_group.to_string()))?;

        if let Some(detail) = backends.get_mut(&address) {
            detail.dissociate(process_group);
            self.state.put_backend(&detail.to_record())?;
        }
        self.state.delete_association(process_group)?;
        info!(%process_group, backend = %address, "association removed");
        Ok(address)
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Existing association, provided its holder is not defunct.
    async fn healthy_association(&self, process_group: &ProcessGroup) -> Option<BackendAddress> {
        let associations = self.associations.read().await;
        let address = associations.get(process_group)?;
        let backends = self.backends.read().await;
        let detail = backends.get(address)?;
        if self.is_defunct(detail) {
            return None;
        }
        Some(address.clone())
    }

    /// Placement under the lease: re-check, pick, persist.
    async fn place_locked(&self, process_group: &ProcessGroup) -> RegistryResult<BackendAddress> {
        let mut associations = self.associations.write().await;
        let mut backends = self.backends.write().await;

        // Double-check after lease acquisition: a racing caller may have
        // placed this group already. The loser observes the winner.
        if let Some(address) = associations.get(process_group) {
            if let Some(detail) = backends.get(address) {
                if !self.is_defunct(detail) {
                    return Ok(address.clone());
                }
            }
        }

        // Lazy revocation: withdraw from a defunct current holder.
        if let Some(old_address) = associations.get(process_group).cloned() {
            if let Some(old) = backends.get_mut(&old_address) {
                old.dissociate(process_group);
                self.state.put_backend(&old.to_record())?;
                warn!(%process_group, backend = %old_address, "reassigning from defunct backend");
            }
        }

        let target_address = backends
            .values()
            .filter(|detail| !self.is_defunct(detail))
            .min_by(|a, b| self.prioritizer.compare(a, b))
            .map(|detail| detail.address.clone())
            .ok_or(RegistryError::NoEligibleBackend)?;

        let target = backends
            .get_mut(&target_address)
            .ok_or(RegistryError::NoEligibleBackend)?;
        target.associate(process_group.clone());
        self.state.put_backend(&target.to_record())?;
        self.state.put_association(process_group, &target_address)?;
        associations.insert(process_group.clone(), target_address.clone());

        info!(%process_group, backend = %target_address, "process group placed");
        Ok(target_address)
    }

    /// Acquire the placement lease, retrying until the bounded timeout.
    async fn acquire_placement_lease(&self) -> RegistryResult<Lease> {
        let deadline = Instant::now() + self.lease_timeout;
        loop {
            match self.state.try_acquire_lease(
                PLACEMENT_LEASE,
                &self.lease_holder,
                LEASE_TTL_SECS,
                epoch_secs(),
            ) {
                Ok(lease) => return Ok(lease),
                Err(StateError::LeaseHeld { holder, .. }) => {
                    if Instant::now() >= deadline {
                        return Err(RegistryError::Unavailable(format!(
                            "placement lease held by {holder}"
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
                Err(e) => return Err(RegistryError::Unavailable(e.to_string())),
            }
        }
    }

    fn is_defunct(&self, detail: &BackendDetail) -> bool {
        detail.is_defunct(
            epoch_secs(),
            self.reporting_frequency_secs,
            self.max_allowed_skips,
        )
    }

    #[cfg(test)]
    pub(crate) async fn force_last_reported_at(&self, address: &str, at: u64) {
        let mut backends = self.backends.write().await;
        if let Some(detail) = backends.get_mut(address) {
            detail.last_reported_at = at;
        }
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prioritizer::LeastAssociated;
    use std::sync::Arc;

    fn test_registry() -> AssociationRegistry {
        AssociationRegistry::new(
            StateStore::open_in_memory().unwrap(),
            Box::new(LeastAssociated),
            10,
            2,
            "leader-test",
        )
    }

    fn pg(name: &str) -> ProcessGroup {
        ProcessGroup::new("app", "cluster", name)
    }

    fn report(ip: &str, load: f64) -> LoadReport {
        LoadReport {
            ip: ip.to_string(),
            port: 8080,
            load,
            tick: 1,
        }
    }

    #[tokio::test]
    async fn new_backends_report_empty_diff() {
        let registry = test_registry();
        let d1 = registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        let d2 = registry.report_backend_load(&report("10.0.0.2", 0.2)).await.unwrap();
        assert!(d1.is_empty());
        assert!(d2.is_empty());
    }

    #[tokio::test]
    async fn placement_spreads_by_association_count() {
        let registry = test_registry();
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        registry.report_backend_load(&report("10.0.0.2", 0.2)).await.unwrap();

        let b1 = registry.associate_and_get_backend(&pg("p1")).await.unwrap();
        let b2 = registry.associate_and_get_backend(&pg("p2")).await.unwrap();
        let b3 = registry.associate_and_get_backend(&pg("p3")).await.unwrap();

        // Least-associated placement alternates between the two backends.
        assert_ne!(b1, b2);
        assert!(b3 == b1 || b3 == b2);

        // Repeat lookups return the existing association.
        assert_eq!(
            registry.associate_and_get_backend(&pg("p1")).await.unwrap(),
            b1
        );
    }

    #[tokio::test]
    async fn no_eligible_backend_without_reports() {
        let registry = test_registry();
        let result = registry.associate_and_get_backend(&pg("p1")).await;
        assert!(matches!(result, Err(RegistryError::NoEligibleBackend)));
    }

    #[tokio::test]
    async fn defunct_backend_excluded_from_new_placement() {
        let registry = test_registry();
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        registry.report_backend_load(&report("10.0.0.2", 0.2)).await.unwrap();
        // Knock backend 1 out past its reporting tolerance.
        registry.force_last_reported_at("10.0.0.1:8080", 0).await;

        for i in 0..4 {
            let backend = registry
                .associate_and_get_backend(&pg(&format!("p{i}")))
                .await
                .unwrap();
            assert_eq!(backend, "10.0.0.2:8080");
        }
    }

    #[tokio::test]
    async fn defunct_holder_reassigned_lazily() {
        let registry = test_registry();
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        let first = registry.associate_and_get_backend(&pg("p1")).await.unwrap();
        assert_eq!(first, "10.0.0.1:8080");

        registry.report_backend_load(&report("10.0.0.2", 0.2)).await.unwrap();
        registry.force_last_reported_at("10.0.0.1:8080", 0).await;

        // Re-placement happens only when the group is next requested.
        let second = registry.associate_and_get_backend(&pg("p1")).await.unwrap();
        assert_eq!(second, "10.0.0.2:8080");
        assert_eq!(
            registry.get_associated_backend(&pg("p1")).await.as_deref(),
            Some("10.0.0.2:8080")
        );
    }

    #[tokio::test]
    async fn association_diff_delivered_on_next_report() {
        let registry = test_registry();
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        registry.associate_and_get_backend(&pg("p1")).await.unwrap();

        let delegated = registry
            .report_backend_load(&report("10.0.0.1", 0.1))
            .await
            .unwrap();
        assert_eq!(delegated, vec![pg("p1")]);

        // Drained: the following report carries nothing new.
        let delegated = registry
            .report_backend_load(&report("10.0.0.1", 0.1))
            .await
            .unwrap();
        assert!(delegated.is_empty());
    }

    #[tokio::test]
    async fn racing_placements_observe_one_winner() {
        let registry = Arc::new(test_registry());
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        registry.report_backend_load(&report("10.0.0.2", 0.2)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.associate_and_get_backend(&pg("contended")).await
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            winners.push(handle.await.unwrap().unwrap());
        }
        // Every caller saw the same placement.
        assert!(winners.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn remove_association_clears_state() {
        let registry = test_registry();
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        registry.associate_and_get_backend(&pg("p1")).await.unwrap();

        let removed = registry.remove_association(&pg("p1")).await.unwrap();
        assert_eq!(removed, "10.0.0.1:8080");
        assert!(registry.get_associated_backend(&pg("p1")).await.is_none());

        let again = registry.remove_association(&pg("p1")).await;
        assert!(matches!(again, Err(RegistryError::UnknownProcessGroup(_))));
    }

    #[tokio::test]
    async fn reload_reproduces_association_view() {
        let store = StateStore::open_in_memory().unwrap();
        let registry = AssociationRegistry::new(
            store.clone(),
            Box::new(LeastAssociated),
            10,
            2,
            "leader-1",
        );
        registry.report_backend_load(&report("10.0.0.1", 0.1)).await.unwrap();
        registry.report_backend_load(&report("10.0.0.2", 0.2)).await.unwrap();
        registry.associate_and_get_backend(&pg("p1")).await.unwrap();
        registry.associate_and_get_backend(&pg("p2")).await.unwrap();
        let mut before: Vec<_> = registry
            .get_associations()
            .await
            .into_iter()
            .map(|e| (e.process_group, e.backend))
            .collect();
        before.sort_by(|a, b| a.0.proc_name.cmp(&b.0.proc_name));

        // Simulated restart: fresh registry over the same store.
        let restarted = AssociationRegistry::new(
            store,
            Box::new(LeastAssociated),
            10,
            2,
            "leader-1",
        );
        restarted.load().await.unwrap();
        let mut after: Vec<_> = restarted
            .get_associations()
            .await
            .into_iter()
            .map(|e| (e.process_group, e.backend))
            .collect();
        after.sort_by(|a, b| a.0.proc_name.cmp(&b.0.proc_name));

        assert_eq!(before, after);
    }
}
