//! Pluggable backend-selection strategy for new placements.
//!
//! The comparison rule is deliberately swappable: today placement
//! prefers the backend carrying the fewest process groups, but a
//! load-factor or capacity-aware strategy can be dropped in without
//! touching the registry.

use std::cmp::Ordering;

use crate::detail::BackendDetail;

/// Ranks candidate backends for a new placement. `Less` means "prefer".
pub trait BackendPrioritizer: Send + Sync {
    fn compare(&self, a: &BackendDetail, b: &BackendDetail) -> Ordering;
}

/// Prefer the backend with the fewest associated process groups,
/// breaking ties by address for determinism.
pub struct LeastAssociated;

impl BackendPrioritizer for LeastAssociated {
    fn compare(&self, a: &BackendDetail, b: &BackendDetail) -> Ordering {
        a.associated
            .len()
            .cmp(&b.associated.len())
            .then_with(|| a.address.cmp(&b.address))
    }
}

/// Prefer the backend with the lowest last-reported load factor.
/// Backends that never reported a load sort last.
pub struct LeastLoaded;

impl BackendPrioritizer for LeastLoaded {
    fn compare(&self, a: &BackendDetail, b: &BackendDetail) -> Ordering {
        let load_a = a.last_reported_load.unwrap_or(f64::MAX);
        let load_b = b.last_reported_load.unwrap_or(f64::MAX);
        load_a
            .partial_cmp(&load_b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.address.cmp(&b.address))
    }
}
