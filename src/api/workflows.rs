/// Workflow management REST endpoints
///
/// Every change is validated, stored and hot-reloaded into the registry
/// before the response is sent.

use crate::api::{actor, ApiError, AppState};
use crate::workflow::types::{Workflow, WorkflowExecution};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/executions", get(list_executions))
}

/// POST /api/workflows
/// Body: { "name": "...", "triggerType": "RECORD_CREATED", "tableId": "...", "nodes": [...], "edges": [...] }
async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut workflow): Json<Workflow>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    tracing::info!("📥 Create workflow request: {}", workflow.name);
    workflow.created_by = actor(&headers);
    let created = state.workflows.create(workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", created.id, created.name);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.workflows.list().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.get(id).await?))
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(workflow): Json<Workflow>,
) -> Result<Json<Workflow>, ApiError> {
    tracing::info!("📥 Update workflow request: {}", id);
    Ok(Json(state.workflows.update(id, workflow).await?))
}

async fn delete_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.workflows.delete(id).await?;
    tracing::info!("🗑️ Deleted workflow: {}", id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ExecutionParams {
    limit: Option<u32>,
}

/// GET /api/workflows/{id}/executions?limit=50
async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ExecutionParams>,
) -> Result<Json<Vec<WorkflowExecution>>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.workflows.executions(id, limit).await?))
}
