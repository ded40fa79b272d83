//! profgrid-association — the leader's process-group ↔ backend registry.
//!
//! Backends report load on a fixed cadence and discover newly delegated
//! process groups in the response (pull, not push). Placement of an
//! unassigned process group picks the best non-defunct backend through
//! a pluggable [`BackendPrioritizer`], and the read-decide-persist
//! sequence runs under a lease from the state store so two racing
//! placements cannot both win.

pub mod detail;
pub mod error;
pub mod prioritizer;
pub mod registry;

pub use detail::BackendDetail;
pub use error::{RegistryError, RegistryResult};
pub use prioritizer::{BackendPrioritizer, LeastAssociated};
pub use registry::{AssociationEntry, AssociationRegistry, LoadReport};
