//! HTTP handlers.
//!
//! Recorder-facing handlers never surface planner internals as errors:
//! a poll with nothing to hand out is a normal 200 with a null
//! assignment. Only an assignment-state claim that cannot be resolved
//! to a live window is a client error.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::debug;

use profgrid_association::{LoadReport, RegistryError};
use profgrid_state::{ProcessGroup, RecordingPolicy, WorkAssignment};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn registry_error_response(e: RegistryError) -> axum::response::Response {
    let status = match &e {
        RegistryError::UnknownProcessGroup(_) => StatusCode::NOT_FOUND,
        RegistryError::NoEligibleBackend | RegistryError::Unavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RegistryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Recorder poll ──────────────────────────────────────────────

/// Identity of the polling recorder.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RecorderInfo {
    pub ip: String,
    pub hostname: String,
    pub app_id: String,
    pub cluster: String,
    pub proc_name: String,
}

impl RecorderInfo {
    fn process_group(&self) -> ProcessGroup {
        ProcessGroup::new(&self.app_id, &self.cluster, &self.proc_name)
    }

    fn identity(&self) -> String {
        format!("{}/{}", self.ip, self.hostname)
    }
}

/// The recorder's view of its last issued assignment.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct WorkLastIssued {
    pub work_id: u64,
    pub state: String,
    pub elapsed_secs: u32,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct PollRequest {
    pub recorder: RecorderInfo,
    #[serde(default)]
    pub last_issued: Option<WorkLastIssued>,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct PollResponse {
    pub controller_id: String,
    pub local_time: u64,
    /// `None` is a normal empty poll.
    pub assignment: Option<WorkAssignment>,
}

/// POST /recorder/poll
pub async fn recorder_poll(
    State(state): State<ApiState>,
    Json(req): Json<PollRequest>,
) -> impl IntoResponse {
    // A claimed work id must resolve to a live window; anything else
    // means the recorder is reporting against an epoch this controller
    // no longer tracks.
    if let Some(last) = &req.last_issued {
        if state.lookup.resolve(last.work_id).is_none() {
            return error_response(
                &format!("unknown work id {}", last.work_id),
                StatusCode::BAD_REQUEST,
            )
            .into_response();
        }
    }

    let process_group = req.recorder.process_group();
    let now = epoch_secs();
    let assignment = {
        let contexts = state.contexts.read().await;
        match contexts.get(&process_group) {
            Some(context) => {
                context.observe_recorder(&req.recorder.identity(), now);
                context.next_assignment().map(|mut assignment| {
                    assignment.issued_at = now;
                    assignment
                })
            }
            // Group not delegated to this backend (yet): empty poll.
            None => None,
        }
    };

    debug!(
        %process_group,
        recorder = %req.recorder.identity(),
        handed_out = assignment.is_some(),
        "recorder poll"
    );
    ApiResponse::ok(PollResponse {
        controller_id: state.controller_id.clone(),
        local_time: now,
        assignment,
    })
    .into_response()
}

// ── Backend load ───────────────────────────────────────────────

/// POST /leader/load
pub async fn report_load(
    State(state): State<ApiState>,
    Json(report): Json<LoadReport>,
) -> impl IntoResponse {
    match state.registry.report_backend_load(&report).await {
        Ok(delegated) => ApiResponse::ok(delegated).into_response(),
        Err(e) => registry_error_response(e),
    }
}

// ── Work / policy lookup ───────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct WorkQuery {
    /// The requesting backend's IP, checked against the association.
    pub ip: String,
    /// The requesting backend's port; the gate compares the full
    /// `ip:port` address, since co-hosted backends share an IP.
    pub port: u16,
}

impl WorkQuery {
    fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// GET /leader/work/{app_id}/{cluster}/{proc}?ip=…&port=…
///
/// Only the backend the process group is associated with may fetch its
/// recording policy; anything else indicates assignment drift.
pub async fn get_work(
    State(state): State<ApiState>,
    Path((app_id, cluster, proc_name)): Path<(String, String, String)>,
    Query(query): Query<WorkQuery>,
) -> impl IntoResponse {
    let process_group = ProcessGroup::new(&app_id, &cluster, &proc_name);

    let Some(backend) = state.registry.get_associated_backend(&process_group).await else {
        return error_response(
            &format!("{process_group} is not associated with any backend"),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    };
    let caller = query.address();
    if backend != caller {
        return error_response(
            &format!("{process_group} is associated with {backend}, not {caller}"),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    match state.store.get_policy(&process_group) {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response(
            &format!("no recording policy for {process_group}"),
            StatusCode::NOT_FOUND,
        )
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Associations ───────────────────────────────────────────────

/// PUT /leader/association
///
/// Idempotent placement: an already-placed group returns its existing
/// backend unless the holder has gone defunct.
pub async fn put_association(
    State(state): State<ApiState>,
    Json(process_group): Json<ProcessGroup>,
) -> impl IntoResponse {
    match state.registry.associate_and_get_backend(&process_group).await {
        Ok(backend) => ApiResponse::ok(serde_json::json!({
            "process_group": process_group,
            "backend": backend,
        }))
        .into_response(),
        Err(e) => registry_error_response(e),
    }
}

/// GET /leader/associations
pub async fn list_associations(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.get_associations().await).into_response()
}

/// DELETE /leader/association
pub async fn delete_association(
    State(state): State<ApiState>,
    Json(process_group): Json<ProcessGroup>,
) -> impl IntoResponse {
    match state.registry.remove_association(&process_group).await {
        Ok(backend) => ApiResponse::ok(backend).into_response(),
        Err(e) => registry_error_response(e),
    }
}

// ── Policies ───────────────────────────────────────────────────

#[derive(serde::Serialize, serde::Deserialize)]
pub struct PolicyUpdate {
    pub process_group: ProcessGroup,
    pub policy: RecordingPolicy,
}

/// PUT /leader/policy
pub async fn put_policy(
    State(state): State<ApiState>,
    Json(update): Json<PolicyUpdate>,
) -> impl IntoResponse {
    match state.store.put_policy(&update.process_group, &update.policy) {
        Ok(()) => ApiResponse::ok(update).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
