//! Planner task — drives one [`PlannerCore`] on the rotation period.
//!
//! The task owns two timers: the rotation tick (one window period) and
//! the lead-time policy fetch, armed `policy_refresh_buffer_secs` before
//! the next rotation. Fetches run in their own spawned task so a slow
//! policy source never delays a rotation; a fetch that misses its window
//! simply leaves the epoch skipped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use profgrid_state::{ProcessGroup, RecordingPolicy};

use crate::core::{PlannerCore, RotationOutcome};
use crate::error::PlannerResult;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Future resolving to the recording policy for one process group.
pub type PolicyFuture = BoxFuture<PlannerResult<RecordingPolicy>>;

/// Pluggable policy source. In the daemon this reads the policy store;
/// tests substitute canned responses or failures.
pub type PolicySource = Arc<dyn Fn(ProcessGroup) -> PolicyFuture + Send + Sync>;

/// Handle to one process group's running planner task.
pub struct Planner {
    core: Arc<Mutex<PlannerCore>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Planner {
    /// Spawn the rotation loop for `core`.
    ///
    /// The first policy fetch runs immediately so the first rotation can
    /// open a window; each later fetch is armed
    /// `policy_refresh_buffer_secs` before its rotation.
    pub fn spawn(
        core: PlannerCore,
        policy_source: PolicySource,
        policy_refresh_buffer_secs: u32,
    ) -> Self {
        let process_group = core.process_group().clone();
        let window_secs = core.schedule_config().window_secs();
        let core = Arc::new(Mutex::new(core));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_core = Arc::clone(&core);
        let handle = tokio::spawn(async move {
            run_planner_loop(
                loop_core,
                process_group,
                policy_source,
                window_secs,
                policy_refresh_buffer_secs,
                shutdown_rx,
            )
            .await;
        });

        Self {
            core,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The underlying state machine, for the poll surface and tests.
    pub fn core(&self) -> Arc<Mutex<PlannerCore>> {
        Arc::clone(&self.core)
    }

    /// Stop the rotation loop and expire the live window. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = {
            let mut slot = self.handle.lock().await;
            slot.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.core.lock().await.close();
    }
}

async fn run_planner_loop(
    core: Arc<Mutex<PlannerCore>>,
    process_group: ProcessGroup,
    policy_source: PolicySource,
    window_secs: u32,
    policy_refresh_buffer_secs: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let window_period = Duration::from_secs(u64::from(window_secs));
    let fetch_lead =
        Duration::from_secs(u64::from(window_secs.saturating_sub(policy_refresh_buffer_secs)));

    info!(%process_group, window_secs, "planner loop starting");

    // First fetch runs inline: the first rotation follows right after,
    // and there is no window to rotate out yet.
    tokio::select! {
        result = fetch_policy(&policy_source, &process_group) => {
            core.lock().await.note_policy(1, result);
        }
        _ = shutdown.changed() => {
            core.lock().await.close();
            return;
        }
    }

    // Rotations fire on fixed boundaries from the interval's start; a
    // slow rotation body delays its own tick only, and the next one
    // returns to the original cadence. The first tick is immediate.
    let mut ticker = tokio::time::interval(window_period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = core.lock().await.rotate(epoch_secs());
                debug!(%process_group, ?outcome, "window rotation");
                if outcome == RotationOutcome::Closed {
                    return;
                }

                spawn_lead_fetch(
                    Arc::clone(&core),
                    process_group.clone(),
                    Arc::clone(&policy_source),
                    fetch_lead,
                    shutdown.clone(),
                )
                .await;
            }
            _ = shutdown.changed() => {
                debug!(%process_group, "planner loop shutting down");
                core.lock().await.close();
                return;
            }
        }
    }
}

/// Arm the lead-time fetch for the next window. Runs detached so a slow
/// or hung policy source cannot delay the rotation tick.
async fn spawn_lead_fetch(
    core: Arc<Mutex<PlannerCore>>,
    process_group: ProcessGroup,
    policy_source: PolicySource,
    lead: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let next_index = core.lock().await.window_index() + 1;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(lead) => {
                let result = fetch_policy(&policy_source, &process_group).await;
                core.lock().await.note_policy(next_index, result);
            }
            _ = shutdown.changed() => {}
        }
    });
}

async fn fetch_policy(
    policy_source: &PolicySource,
    process_group: &ProcessGroup,
) -> Option<RecordingPolicy> {
    match policy_source(process_group.clone()).await {
        Ok(policy) => Some(policy),
        Err(e) => {
            warn!(%process_group, error = %e, "policy fetch failed");
            None
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessGroupContext;
    use crate::core::PlannerState;
    use crate::error::PlannerError;
    use crate::lookup::WindowLookup;
    use crate::window::DiscardSink;
    use profgrid_scheduler::{ScheduleConfig, SlotPool, WorkIdGenerator};
    use profgrid_state::WorkSpec;

    fn policy() -> RecordingPolicy {
        RecordingPolicy {
            duration_secs: 10,
            coverage_pct: 100,
            description: "cpu".to_string(),
            work: vec![WorkSpec::CpuSample {
                frequency_hz: 50,
                max_frames: 64,
            }],
        }
    }

    fn ok_source() -> PolicySource {
        Arc::new(|_pg| Box::pin(async { Ok(policy()) }))
    }

    fn failing_source() -> PolicySource {
        Arc::new(|_pg| {
            Box::pin(async { Err(PlannerError::PolicyFetch("store unreachable".to_string())) })
        })
    }

    struct Parts {
        core: PlannerCore,
        pool: Arc<SlotPool>,
        lookup: Arc<WindowLookup>,
    }

    /// One-minute window, three healthy recorders.
    fn parts() -> Parts {
        let process_group = ProcessGroup::new("app", "cluster", "proc");
        let pool = Arc::new(SlotPool::new(50));
        let lookup = Arc::new(WindowLookup::new());
        let context = Arc::new(ProcessGroupContext::new(process_group.clone(), 86_400));
        for i in 0..3 {
            context.observe_recorder(&format!("recorder-{i}"), epoch_secs());
        }
        let config = ScheduleConfig::new(1, 5, 10, 20).unwrap();
        let core = PlannerCore::new(
            process_group,
            config,
            Arc::clone(&pool),
            Arc::clone(&lookup),
            Arc::new(DiscardSink),
            context,
            Arc::new(WorkIdGenerator::new(1)),
        );
        Parts { core, pool, lookup }
    }

    #[tokio::test(start_paused = true)]
    async fn first_rotation_opens_a_window() {
        let p = parts();
        let planner = Planner::spawn(p.core, ok_source(), 30);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(p.lookup.len(), 3);
        assert_eq!(planner.core().lock().await.state(), PlannerState::WindowActive);

        planner.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lead_fetch_feeds_the_next_window() {
        let p = parts();
        let planner = Planner::spawn(p.core, ok_source(), 30);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first_ids: Vec<u64> = {
            let mut ids: Vec<u64> = Vec::new();
            for id in 1..=10u64 {
                if p.lookup.resolve((1u64 << 32) | id).is_some() {
                    ids.push((1u64 << 32) | id);
                }
            }
            ids
        };
        assert_eq!(first_ids.len(), 3);

        // Past the next rotation: the lead fetch at t≈30s supplied the
        // policy for window 2, so fresh ids replace the old ones.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(p.lookup.len(), 3);
        for id in &first_ids {
            assert!(p.lookup.resolve(*id).is_none());
        }

        planner.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_policy_source_skips_every_epoch() {
        let p = parts();
        let planner = Planner::spawn(p.core, failing_source(), 30);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(p.lookup.is_empty());
        assert_eq!(p.pool.available(), p.pool.capacity());
        let core = planner.core();
        let guard = core.lock().await;
        assert_eq!(guard.state(), PlannerState::WindowRotating);
        assert!(guard.window_index() >= 2);
        drop(guard);

        planner.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_rotation_does_not_shift_later_boundaries() {
        let p = parts();
        let planner = Planner::spawn(p.core, ok_source(), 30);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(planner.core().lock().await.window_index(), 1);

        // Hold the core across the second boundary: the rotation due at
        // t=60 cannot run until the lock frees at t=90.
        {
            let core = planner.core();
            let guard = core.lock().await;
            tokio::time::sleep(Duration::from_secs(89)).await;
            drop(guard);
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(planner.core().lock().await.window_index(), 2);

        // The third rotation still fires on the original t=120 boundary
        // instead of a full period after the late second rotation.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(planner.core().lock().await.window_index(), 3);

        planner.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_expires_the_live_window_and_is_idempotent() {
        let p = parts();
        let planner = Planner::spawn(p.core, ok_source(), 30);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(p.pool.available() < p.pool.capacity());

        planner.close().await;
        assert_eq!(p.pool.available(), p.pool.capacity());
        assert!(p.lookup.is_empty());
        assert_eq!(planner.core().lock().await.state(), PlannerState::Closed);

        // Second close is a no-op.
        planner.close().await;
        assert_eq!(p.pool.available(), p.pool.capacity());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_first_rotation_closes_cleanly() {
        let p = parts();
        // A source that never resolves.
        let hung: PolicySource = Arc::new(|_pg| Box::pin(std::future::pending()));
        let planner = Planner::spawn(p.core, hung, 30);

        planner.close().await;
        assert_eq!(planner.core().lock().await.state(), PlannerState::Closed);
        assert!(p.lookup.is_empty());
    }
}
