//! profgrid-state — durable control-plane state backed by redb.
//!
//! Holds everything the leader must be able to reload after a restart:
//! process-group → backend associations, per-backend records, recording
//! policies, and the lease rows used for single-writer exclusion over
//! placement decisions. Also home to the domain types shared by every
//! other profgrid crate.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{Lease, StateStore};
pub use types::*;
