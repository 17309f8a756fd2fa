//! Manual approval handlers.

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use flowforge_core::repository::WorkflowRepository;
use flowforge_core::workflow::queue::{ExecutionRequest, LaunchError, QueueError};
use flowforge_types::execution::WorkflowApproval;

use super::execution::owned_execution;
use crate::http::error::AppError;
use crate::http::extractors::user::UserId;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub approver: String,
}

impl DecisionBody {
    fn approver(&self) -> Result<&str, AppError> {
        let approver = self.approver.trim();
        if approver.is_empty() {
            return Err(AppError::BadRequest("approver must not be empty".to_string()));
        }
        Ok(approver)
    }
}

/// The approval, if its workflow belongs to `user`.
async fn owned_approval(state: &AppState, user: &str, id: &Uuid) -> Result<WorkflowApproval, AppError> {
    let approval = state.orchestrator.approvals().get(id).await?;
    owned_execution(state, user, &approval.execution_id)
        .await
        .map_err(|_| AppError::NotFound(format!("approval not found: {id}")))?;
    Ok(approval)
}

/// GET /api/v1/approvals/pending - Pending approvals of the caller's workflows.
pub async fn list_pending(
    State(state): State<AppState>,
    UserId(user): UserId,
) -> Result<ApiResponse<Vec<WorkflowApproval>>, AppError> {
    let start = Instant::now();
    let pending = state.orchestrator.approvals().list_pending().await?;

    let mut owners: HashMap<Uuid, bool> = HashMap::new();
    let mut visible = Vec::new();
    for approval in pending {
        let owned = match owners.get(&approval.workflow_id) {
            Some(owned) => *owned,
            None => {
                let owned = state
                    .repo
                    .get_workflow(&approval.workflow_id)
                    .await?
                    .is_some_and(|w| w.user_id == user);
                owners.insert(approval.workflow_id, owned);
                owned
            }
        };
        if owned {
            visible.push(approval);
        }
    }

    Ok(ApiResponse::success(visible, start).with_link("self", "/api/v1/approvals/pending"))
}

/// POST /api/v1/approvals/{id}/approve
///
/// Records the decision and queues the paused execution for resumption.
/// When the queue is full the resume is handed to a background send instead
/// of failing, since the decision is already stored.
pub async fn approve(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<DecisionBody>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let approver = body.approver()?;
    owned_approval(&state, &user, &id).await?;

    let approval = state.orchestrator.approvals().approve(&id, approver).await?;
    let execution = owned_execution(&state, &user, &approval.execution_id).await?;
    let request = ExecutionRequest::resume(&execution);
    let resume = match state.launcher.queue().try_submit(request.clone()) {
        Ok(()) => "queued",
        Err(QueueError::Full) => {
            let queue = state.launcher.queue().clone();
            tokio::spawn(async move {
                let execution_id = request.execution_id;
                if let Err(e) = queue.submit(request).await {
                    tracing::warn!(%execution_id, error = %e, "deferred resume was not enqueued");
                }
            });
            "deferred"
        }
        Err(e) => return Err(LaunchError::from(e).into()),
    };

    Ok(ApiResponse::success(
        json!({ "approval": approval, "execution_id": execution.id, "resume": resume }),
        start,
    )
    .with_status(StatusCode::ACCEPTED)
    .with_link("execution", &format!("/api/v1/executions/{}", execution.id)))
}

/// POST /api/v1/approvals/{id}/reject - Fails the gated task and the execution.
pub async fn reject(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<DecisionBody>,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let approver = body.approver()?;
    let approval = owned_approval(&state, &user, &id).await?;

    let status = state.orchestrator.reject(id, approver).await?;
    Ok(ApiResponse::success(
        json!({ "approval_id": id, "execution_id": approval.execution_id, "execution_status": status }),
        start,
    )
    .with_link("execution", &format!("/api/v1/executions/{}", approval.execution_id)))
}
