//! Association registry error types.

use thiserror::Error;

/// Errors surfaced by the association registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The coordination store could not be reached or its placement
    /// lease could not be acquired within the bounded timeout.
    /// Retryable — callers must never treat this as "no association".
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("no non-defunct backend eligible for placement")]
    NoEligibleBackend,

    #[error("no association exists for process group {0}")]
    UnknownProcessGroup(String),

    #[error("state store error: {0}")]
    State(#[from] profgrid_state::StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
