//! Delegation loop — the backend half of the standalone daemon.
//!
//! On a fixed cadence the backend reports its load to the registry and
//! receives the diff of process groups newly delegated to it. Each new
//! group gets its own scheduling context and planner; planners run until
//! daemon shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use profgrid_api::ContextMap;
use profgrid_association::{AssociationRegistry, LoadReport};
use profgrid_planner::{
    Planner, PlannerCore, PlannerError, PolicySource, ProcessGroupContext, WindowLookup,
};
use profgrid_planner::window::DiscardSink;
use profgrid_scheduler::{ScheduleConfig, SlotPool, WorkIdGenerator};
use profgrid_state::{ProcessGroup, StateStore};

/// Scalar knobs for the delegation loop.
pub struct DelegatorConfig {
    /// Address this backend reports itself under.
    pub ip: String,
    pub port: u16,
    pub reporting_frequency_secs: u64,
    pub policy_refresh_buffer_secs: u32,
    pub recorder_defunct_threshold_secs: u64,
}

/// Owns the load-report cadence and the planners it spawns.
pub struct Delegator {
    registry: Arc<AssociationRegistry>,
    store: StateStore,
    slot_pool: Arc<SlotPool>,
    lookup: Arc<WindowLookup>,
    contexts: ContextMap,
    work_ids: Arc<WorkIdGenerator>,
    schedule_config: ScheduleConfig,
    config: DelegatorConfig,
    planners: HashMap<ProcessGroup, Planner>,
    tick: u64,
}

impl Delegator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AssociationRegistry>,
        store: StateStore,
        slot_pool: Arc<SlotPool>,
        lookup: Arc<WindowLookup>,
        contexts: ContextMap,
        work_ids: Arc<WorkIdGenerator>,
        schedule_config: ScheduleConfig,
        config: DelegatorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            slot_pool,
            lookup,
            contexts,
            work_ids,
            schedule_config,
            config,
            planners: HashMap::new(),
            tick: 0,
        }
    }

    /// Report load until shutdown, then close every planner.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.reporting_frequency_secs);
        info!(
            address = %self.address(),
            period_secs = self.config.reporting_frequency_secs,
            "delegation loop starting"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.report_once().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!(planners = self.planners.len(), "delegation loop shutting down");
        for (process_group, planner) in self.planners.drain() {
            planner.close().await;
            self.contexts.write().await.remove(&process_group);
        }
    }

    /// One load report; spawn a planner per newly delegated group and
    /// close the planner of any group the leader has withdrawn.
    async fn report_once(&mut self) {
        self.tick += 1;
        let report = LoadReport {
            ip: self.config.ip.clone(),
            port: self.config.port,
            load: pool_load(&self.slot_pool),
            tick: self.tick,
        };
        let delegated = match self.registry.report_backend_load(&report).await {
            Ok(delegated) => delegated,
            Err(e) => {
                warn!(error = %e, "load report failed");
                return;
            }
        };
        for process_group in delegated {
            if self.planners.contains_key(&process_group) {
                continue;
            }
            self.spawn_planner(process_group).await;
        }
        self.reconcile_withdrawals().await;
    }

    /// Withdrawals are not pushed and do not appear in the report diff,
    /// so each tick checks the registry's current view and closes the
    /// planner of any group no longer associated with this backend.
    async fn reconcile_withdrawals(&mut self) {
        let address = self.address();
        let owned: HashSet<ProcessGroup> = self
            .registry
            .get_associations()
            .await
            .into_iter()
            .filter(|entry| entry.backend == address)
            .map(|entry| entry.process_group)
            .collect();
        let withdrawn: Vec<ProcessGroup> = self
            .planners
            .keys()
            .filter(|process_group| !owned.contains(*process_group))
            .cloned()
            .collect();
        for process_group in withdrawn {
            if let Some(planner) = self.planners.remove(&process_group) {
                planner.close().await;
                self.contexts.write().await.remove(&process_group);
                info!(%process_group, "planner closed for withdrawn process group");
            }
        }
    }

    async fn spawn_planner(&mut self, process_group: ProcessGroup) {
        let context = Arc::new(ProcessGroupContext::new(
            process_group.clone(),
            self.config.recorder_defunct_threshold_secs,
        ));
        self.contexts
            .write()
            .await
            .insert(process_group.clone(), Arc::clone(&context));

        let core = PlannerCore::new(
            process_group.clone(),
            self.schedule_config.clone(),
            Arc::clone(&self.slot_pool),
            Arc::clone(&self.lookup),
            Arc::new(DiscardSink),
            context,
            Arc::clone(&self.work_ids),
        );
        let planner = Planner::spawn(
            core,
            store_policy_source(self.store.clone()),
            self.config.policy_refresh_buffer_secs,
        );
        info!(%process_group, "planner spawned for delegated process group");
        self.planners.insert(process_group, planner);
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    #[cfg(test)]
    fn planner_count(&self) -> usize {
        self.planners.len()
    }
}

/// Load estimate reported to the leader: the issued fraction of the
/// slot pool.
fn pool_load(pool: &SlotPool) -> f64 {
    let capacity = pool.capacity();
    if capacity == 0 {
        return 1.0;
    }
    f64::from(capacity - pool.available()) / f64::from(capacity)
}

/// Policy source backed by the policy store. A missing policy is a
/// fetch failure, which the planner turns into a skipped epoch.
fn store_policy_source(store: StateStore) -> PolicySource {
    Arc::new(move |process_group: ProcessGroup| {
        let store = store.clone();
        Box::pin(async move {
            match store.get_policy(&process_group) {
                Ok(Some(policy)) => Ok(policy),
                Ok(None) => Err(PlannerError::PolicyFetch(format!(
                    "no recording policy stored for {process_group}"
                ))),
                Err(e) => Err(PlannerError::PolicyFetch(e.to_string())),
            }
        })
    })
}
