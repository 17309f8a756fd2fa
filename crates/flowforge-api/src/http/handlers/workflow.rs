//! Workflow registration and manual run handlers.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use flowforge_core::repository::WorkflowRepository;
use flowforge_types::execution::{TriggerContext, WorkflowExecution};
use flowforge_types::workflow::{StoredWorkflow, TriggerType, WorkflowDefinition};

use super::payload_from;
use crate::http::error::AppError;
use crate::http::extractors::user::UserId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// POST /api/v1/workflows - Validate and register a definition.
///
/// Registering an existing name replaces its definition and triggers.
pub async fn register_workflow(
    State(state): State<AppState>,
    UserId(user): UserId,
    axum::Json(definition): axum::Json<WorkflowDefinition>,
) -> Result<ApiResponse<StoredWorkflow>, AppError> {
    let start = Instant::now();
    let stored = state.workflows.register(&user, definition).await?;
    let id = stored.id;

    Ok(ApiResponse::success(stored, start)
        .with_status(StatusCode::CREATED)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("run", &format!("/api/v1/workflows/{id}/run")))
}

/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<AppState>,
    UserId(user): UserId,
) -> Result<ApiResponse<Vec<StoredWorkflow>>, AppError> {
    let start = Instant::now();
    let workflows = state.workflows.list(&user).await?;
    Ok(ApiResponse::success(workflows, start).with_link("self", "/api/v1/workflows"))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<StoredWorkflow>, AppError> {
    let start = Instant::now();
    let workflow = state.workflows.get(&user, &id).await?;
    Ok(ApiResponse::success(workflow, start)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("executions", &format!("/api/v1/workflows/{id}/executions")))
}

/// DELETE /api/v1/workflows/{id} - Remove a workflow with its triggers.
pub async fn delete_workflow(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    state.workflows.remove(&user, &id).await?;
    Ok(ApiResponse::success(json!({ "deleted": true, "id": id }), start))
}

/// POST /api/v1/workflows/{id}/run - Manual trigger.
///
/// The request body, if any, becomes the trigger payload.
pub async fn run_workflow(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let trigger = TriggerContext {
        kind: TriggerType::Manual,
        payload: payload_from(&body),
    };
    let execution_id = state.launcher.launch(&user, id, trigger).await?;

    Ok(ApiResponse::success(json!({ "execution_id": execution_id, "status": "pending" }), start)
        .with_status(StatusCode::ACCEPTED)
        .with_link("execution", &format!("/api/v1/executions/{execution_id}")))
}

/// GET /api/v1/workflows/{id}/executions - Most recent executions first.
pub async fn list_executions(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<ApiResponse<Vec<WorkflowExecution>>, AppError> {
    let start = Instant::now();
    state.workflows.get(&user, &id).await?;
    let executions = state.repo.list_executions(&id, query.limit.clamp(1, 200)).await?;
    Ok(ApiResponse::success(executions, start)
        .with_link("workflow", &format!("/api/v1/workflows/{id}")))
}
