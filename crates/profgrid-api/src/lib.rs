//! profgrid-api — HTTP surface for the profiling control plane.
//!
//! Two audiences share one router: recorders (poll for work) and
//! backends/admins (load reports, association and policy management).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/recorder/poll` | Recorder heartbeat + work assignment handout |
//! | POST | `/leader/load` | Backend load report, returns newly delegated groups |
//! | GET | `/leader/work/{app_id}/{cluster}/{proc}` | Recording policy for an associated backend |
//! | PUT | `/leader/association` | Place a process group on a backend |
//! | GET | `/leader/associations` | List all associations |
//! | DELETE | `/leader/association` | Remove an association |
//! | PUT | `/leader/policy` | Store a process group's recording policy |

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tokio::sync::RwLock;

use profgrid_association::AssociationRegistry;
use profgrid_planner::{ProcessGroupContext, WindowLookup};
use profgrid_state::{ProcessGroup, StateStore};

/// Process group → scheduling context for every planner live on this
/// backend. The daemon inserts an entry when it spawns a planner and
/// removes it on planner shutdown.
pub type ContextMap = Arc<RwLock<HashMap<ProcessGroup, Arc<ProcessGroupContext>>>>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub registry: Arc<AssociationRegistry>,
    pub lookup: Arc<WindowLookup>,
    pub contexts: ContextMap,
    /// Identity echoed to recorders so they can detect controller moves.
    pub controller_id: String,
}

/// Build the complete router over one [`ApiState`].
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/recorder/poll", post(handlers::recorder_poll))
        .route("/leader/load", post(handlers::report_load))
        .route(
            "/leader/work/{app_id}/{cluster}/{proc}",
            get(handlers::get_work),
        )
        .route(
            "/leader/association",
            put(handlers::put_association).delete(handlers::delete_association),
        )
        .route("/leader/associations", get(handlers::list_associations))
        .route("/leader/policy", put(handlers::put_policy))
        .with_state(state)
}
