//! Work-id → live-window resolution.
//!
//! Recorder polls must resolve any work id they reference to a live
//! aggregation window before the backend responds with derived recorder
//! info; an unresolvable id signals assignment drift and surfaces as a
//! client-visible bad request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::window::AggregationWindow;

/// Shared lookup from work id to the live window that issued it.
/// One instance per backend, shared by all planners and the poll surface.
#[derive(Default)]
pub struct WindowLookup {
    windows: RwLock<HashMap<u64, Arc<AggregationWindow>>>,
}

impl WindowLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every work id of a freshly opened window.
    pub fn register(&self, window: &Arc<AggregationWindow>) {
        let mut windows = self.write();
        for work_id in &window.work_ids {
            windows.insert(*work_id, Arc::clone(window));
        }
    }

    /// Drop the given work ids (window expired).
    pub fn unregister(&self, work_ids: &[u64]) {
        let mut windows = self.write();
        for work_id in work_ids {
            windows.remove(work_id);
        }
    }

    /// Resolve a work id to its live window, if any.
    pub fn resolve(&self, work_id: u64) -> Option<Arc<AggregationWindow>> {
        let windows = match self.windows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.get(&work_id).cloned()
    }

    /// Number of currently registered work ids.
    pub fn len(&self) -> usize {
        match self.windows.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, Arc<AggregationWindow>>> {
        match self.windows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
