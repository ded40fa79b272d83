//! Slot pool — fixed-capacity admission control for recording work.
//!
//! A slot is a pure capacity unit, not a memory allocation: the pool
//! exists to bound how much concurrent recording load a backend admits
//! across all of its process-group planners. Capacity is fixed at
//! construction; there is no resize.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Opaque handle for one unit of admitted capacity.
///
/// Not `Clone` — a handle can only be released once by moving it back
/// into [`SlotPool::release`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    id: u64,
}

struct PoolState {
    /// Ids of currently-outstanding handles.
    issued: HashSet<u64>,
    /// Next handle id. Never reused, so a stale handle can't alias a
    /// live one.
    next_id: u64,
}

/// Fixed-capacity slot pool, shared by every planner on one backend.
///
/// A single mutex over the accounting is sufficient: slots are fungible
/// and acquire/release are short critical sections.
pub struct SlotPool {
    capacity: u32,
    state: Mutex<PoolState>,
}

impl SlotPool {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState {
                issued: HashSet::new(),
                next_id: 1,
            }),
        }
    }

    /// Acquire `n` slots atomically.
    ///
    /// Grants all `n` or fails with [`SchedulerError::SlotsExhausted`]
    /// leaving the pool untouched — no fractional grants.
    pub fn acquire(&self, n: u32) -> SchedulerResult<Vec<Slot>> {
        let mut state = self.lock();
        let available = self.capacity - state.issued.len() as u32;
        if available < n {
            debug!(requested = n, available, "slot acquisition refused");
            return Err(SchedulerError::SlotsExhausted {
                requested: n,
                available,
            });
        }
        let mut granted = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let id = state.next_id;
            state.next_id += 1;
            state.issued.insert(id);
            granted.push(Slot { id });
        }
        Ok(granted)
    }

    /// Return handles to the pool. Always succeeds; releasing an empty
    /// set is a no-op and a handle is accounted for at most once.
    pub fn release(&self, slots: Vec<Slot>) {
        if slots.is_empty() {
            return;
        }
        let mut state = self.lock();
        for slot in slots {
            state.issued.remove(&slot.id);
        }
    }

    /// Slots currently available for acquisition.
    pub fn available(&self) -> u32 {
        let state = self.lock();
        self.capacity - state.issued.len() as u32
    }

    /// Total capacity fixed at construction.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A poisoned accounting mutex means a panic mid-bookkeeping;
        // the sets are still internally consistent, so continue.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
