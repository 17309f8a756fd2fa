//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use flowforge_core::trigger::TriggerError;
use flowforge_core::workflow::approval::ApprovalError;
use flowforge_core::workflow::orchestrator::OrchestratorError;
use flowforge_core::workflow::queue::{LaunchError, QueueError};
use flowforge_core::workflow::service::ServiceError;
use flowforge_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Service(ServiceError),
    Launch(LaunchError),
    Approval(ApprovalError),
    Orchestrator(OrchestratorError),
    Repository(RepositoryError),
    /// Missing caller identity.
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    BadRequest(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        AppError::Service(e)
    }
}

impl From<LaunchError> for AppError {
    fn from(e: LaunchError) -> Self {
        AppError::Launch(e)
    }
}

impl From<ApprovalError> for AppError {
    fn from(e: ApprovalError) -> Self {
        AppError::Approval(e)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Approval(inner) => AppError::Approval(inner),
            other => AppError::Orchestrator(other),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl From<TriggerError> for AppError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::Launch(inner) => AppError::Launch(inner),
            TriggerError::Repository(inner) => AppError::Repository(inner),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, Option<Value>) {
        match self {
            AppError::Service(ServiceError::Invalid(errors)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("workflow has {} validation error(s)", errors.len()),
                Some(json!(errors.iter().map(ToString::to_string).collect::<Vec<_>>())),
            ),
            AppError::Service(ServiceError::Trigger(e)) => {
                (StatusCode::BAD_REQUEST, "INVALID_TRIGGER", e.to_string(), None)
            }
            AppError::Service(ServiceError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", self.message(), None)
            }
            AppError::Service(ServiceError::Repository(e)) | AppError::Repository(e) => repository_parts(e),
            AppError::Launch(LaunchError::WorkflowNotFound(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND", self.message(), None)
            }
            AppError::Launch(LaunchError::Queue(QueueError::Full | QueueError::Closed)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE", self.message(), None)
            }
            AppError::Launch(LaunchError::Repository(e)) => repository_parts(e),
            AppError::Approval(ApprovalError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "APPROVAL_NOT_FOUND", self.message(), None)
            }
            AppError::Approval(ApprovalError::AlreadyDecided { .. }) => {
                (StatusCode::CONFLICT, "APPROVAL_DECIDED", self.message(), None)
            }
            AppError::Approval(ApprovalError::NotAllowed { .. }) => {
                (StatusCode::FORBIDDEN, "APPROVER_NOT_ALLOWED", self.message(), None)
            }
            AppError::Approval(ApprovalError::Repository(e)) => repository_parts(e),
            AppError::Orchestrator(OrchestratorError::ExecutionNotFound(_)) => {
                (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", self.message(), None)
            }
            AppError::Orchestrator(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", self.message(), None)
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Service(e) => e.to_string(),
            AppError::Launch(e) => e.to_string(),
            AppError::Approval(e) => e.to_string(),
            AppError::Orchestrator(e) => e.to_string(),
            AppError::Repository(e) => e.to_string(),
            AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg) => msg.clone(),
        }
    }
}

fn repository_parts(e: &RepositoryError) -> (StatusCode, &'static str, String, Option<Value>) {
    match e {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string(), None),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", e.to_string(), None),
        RepositoryError::Connection => (StatusCode::SERVICE_UNAVAILABLE, "DATABASE_UNAVAILABLE", e.to_string(), None),
        RepositoryError::Query(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", e.to_string(), None),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        let mut error = json!({ "code": code, "message": message });
        if let Some(details) = details {
            error["details"] = details;
        }
        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [error]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
