//! HTTP routes
//!
//! The contract surface over the core: pure read endpoints, and write
//! endpoints that are idempotent at the message level. Repeating a promote
//! on an already-KILLED node is a no-op success, repeating a kill is a no-op
//! success, repeating a supersede with the same pair is a no-op success.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;

use kiln_core::audit::{AuditEvent, AuditEventType, AuditFilter, DecisionAction};
use kiln_core::graph::{GraphError, Lifecycle};

use crate::state::AppState;

/// Assemble the route table
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cognition/assemble", post(assemble))
        .route("/api/audit/events", get(audit_events))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/graph/snapshot", get(graph_snapshot))
        .route("/api/prompts", get(list_prompts))
        .route("/graph/node/promote", post(promote_node))
        .route("/graph/node/kill", post(kill_node))
        .route("/graph/node/supersede", post(supersede_node))
        .route("/recall", get(recall))
        .with_state(state)
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

/// Uniform error envelope
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        let status = match &e {
            GraphError::NotFound(_) => StatusCode::NOT_FOUND,
            GraphError::CycleDetected { .. }
            | GraphError::InvalidTransition { .. }
            | GraphError::InvariantViolation(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

macro_rules! internal_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ApiError {
            fn from(e: $ty) -> Self {
                Self::internal(e.to_string())
            }
        })*
    };
}

internal_from!(
    kiln_core::store::StoreError,
    kiln_core::audit::AuditError,
    kiln_core::prompts::PromptError,
    kiln_core::recall::RecallError,
    kiln_core::cognition::AssembleError
);

// ============================================================================
// COGNITION
// ============================================================================

#[derive(Deserialize)]
struct AssembleRequest {
    topic: String,
}

async fn assemble(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<AssembleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.topic.trim().is_empty() {
        return Err(ApiError::bad_request("topic must not be empty"));
    }
    let artifact = state.assembler.assemble_topic(&request.topic)?;
    Ok(axum::Json(json!({
        "artifact_id": artifact.artifact_id,
        "path": artifact.path,
        "coverage_status": artifact.coverage_status,
    })))
}

// ============================================================================
// READS
// ============================================================================

async fn audit_events(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<AuditFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.audit.read_events(&filter)?;
    Ok(axum::Json(json!({ "count": events.len(), "events": events })))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state
        .sync
        .get_run(&id)?
        .ok_or_else(|| ApiError::not_found(format!("run not found: {id}")))?;
    let message_count = run.raw_content["messages"]
        .as_array()
        .map(Vec::len)
        .unwrap_or(0);
    Ok(axum::Json(json!({
        "id": run.id,
        "status": run.status,
        "last_processed_index": run.last_processed_index,
        "message_count": message_count,
        "raw_content": run.raw_content,
    })))
}

async fn graph_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.graph.get_all_nodes_raw()?;
    let edges = state.graph.get_all_edges()?;
    Ok(axum::Json(json!({ "nodes": nodes, "edges": edges })))
}

async fn list_prompts(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let prompts = state.prompts.latest_prompts()?;
    Ok(axum::Json(json!({ "prompts": prompts })))
}

// ============================================================================
// GRAPH GOVERNANCE
// ============================================================================

#[derive(Deserialize)]
struct PromoteRequest {
    id: String,
    lifecycle: String,
}

async fn promote_node(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<PromoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = Lifecycle::parse_name(&request.lifecycle);
    if target.as_str() != request.lifecycle {
        return Err(ApiError::bad_request(format!(
            "unknown lifecycle '{}'",
            request.lifecycle
        )));
    }

    let intent = state
        .graph
        .get_intent(&request.id)?
        .ok_or_else(|| ApiError::not_found(format!("intent not found: {}", request.id)))?;

    // Message-level idempotency: re-sending a promote against a terminal or
    // already-reached state succeeds without mutating
    if intent.lifecycle == target || intent.lifecycle == Lifecycle::Killed {
        return Ok(axum::Json(json!({
            "status": "noop",
            "lifecycle": intent.lifecycle,
        })));
    }

    state.graph.promote_intent(&request.id, target)?;
    Ok(axum::Json(json!({ "status": "promoted", "lifecycle": target })))
}

#[derive(Deserialize)]
struct KillRequest {
    id: String,
    #[serde(default = "default_reason")]
    reason: String,
    #[serde(default = "default_actor")]
    actor: String,
}

fn default_reason() -> String {
    "unspecified".to_string()
}

fn default_actor() -> String {
    "api".to_string()
}

async fn kill_node(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<KillRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .graph
        .kill_node(&request.id, &request.reason, &request.actor)?;
    Ok(axum::Json(json!({ "status": "killed", "id": request.id })))
}

#[derive(Deserialize)]
struct SupersedeRequest {
    old_id: String,
    new_id: String,
    #[serde(default = "default_reason")]
    reason: String,
    #[serde(default = "default_actor")]
    actor: String,
}

async fn supersede_node(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<SupersedeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Message-level idempotency: the same supersession pair is a no-op
    if let Some(old) = state.graph.get_intent(&request.old_id)? {
        if old.metadata.get("superseded_by").and_then(|v| v.as_str())
            == Some(request.new_id.as_str())
        {
            return Ok(axum::Json(json!({ "status": "noop" })));
        }
    }

    state
        .graph
        .supersede_node(&request.old_id, &request.new_id, &request.reason, &request.actor)?;
    Ok(axum::Json(json!({
        "status": "superseded",
        "old_id": request.old_id,
        "new_id": request.new_id,
    })))
}

// ============================================================================
// RECALL
// ============================================================================

#[derive(Deserialize)]
struct RecallParams {
    query: String,
    k: Option<usize>,
    /// Comma-separated scope list; defaults to global
    allowed_scopes: Option<String>,
    use_rewrite: Option<bool>,
}

async fn recall(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecallParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }
    let k = params.k.unwrap_or(10).clamp(1, 100);
    let scopes: Vec<String> = params
        .allowed_scopes
        .as_deref()
        .unwrap_or("global")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if let Err(e) = state.audit.emit(
        AuditEvent::new(
            AuditEventType::QueryReceived,
            "api",
            "kiln-server",
            DecisionAction::Accepted,
            format!("recall '{}' k={k}", params.query),
        ),
    ) {
        tracing::warn!("audit emit failed: {e}");
    }

    let results = state.recall.recall(
        &params.query,
        k,
        &scopes,
        params.use_rewrite.unwrap_or(false),
    )?;

    Ok(axum::Json(json!({ "count": results.len(), "results": results })))
}
