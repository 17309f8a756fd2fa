//! Execution status and cancellation handlers.

use std::time::Instant;

use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use flowforge_core::repository::WorkflowRepository;
use flowforge_types::execution::{WorkflowExecution, WorkflowTaskExecution};

use crate::http::error::AppError;
use crate::http::extractors::user::UserId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: WorkflowExecution,
    pub tasks: Vec<WorkflowTaskExecution>,
}

/// The execution, if it exists and belongs to `user`.
pub(crate) async fn owned_execution(
    state: &AppState,
    user: &str,
    id: &Uuid,
) -> Result<WorkflowExecution, AppError> {
    state
        .repo
        .get_execution(id)
        .await?
        .filter(|e| e.user_id == user)
        .ok_or_else(|| AppError::NotFound(format!("execution not found: {id}")))
}

/// GET /api/v1/executions/{id} - Execution with its task rows.
pub async fn get_execution(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<ExecutionDetail>, AppError> {
    let start = Instant::now();
    let execution = owned_execution(&state, &user, &id).await?;
    let tasks = state.repo.list_task_executions(&id).await?;
    let workflow_id = execution.workflow_id;

    Ok(ApiResponse::success(ExecutionDetail { execution, tasks }, start)
        .with_link("self", &format!("/api/v1/executions/{id}"))
        .with_link("workflow", &format!("/api/v1/workflows/{workflow_id}")))
}

/// POST /api/v1/executions/{id}/cancel
///
/// A running execution stops dispatching new tasks; a pending or paused
/// one is canceled at once. Finished executions answer `409`.
pub async fn cancel_execution(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let execution = owned_execution(&state, &user, &id).await?;

    if !state.orchestrator.cancel(id).await? {
        return Err(AppError::Conflict(format!(
            "execution {id} already finished as {}",
            execution.status
        )));
    }
    Ok(ApiResponse::success(json!({ "execution_id": id, "cancel_requested": true }), start)
        .with_link("execution", &format!("/api/v1/executions/{id}")))
}
