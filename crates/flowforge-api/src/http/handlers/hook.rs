//! HTTP trigger receiver.
//!
//! `ANY /hooks/{user_id}/{*path}` is matched against the user's registered
//! Http triggers by method and normalized path. A match launches one
//! execution with the request body as trigger payload.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use serde_json::{Value, json};

use super::payload_from;
use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub async fn receive_hook(
    State(state): State<AppState>,
    method: Method,
    Path((user_id, path)): Path<(String, String)>,
    body: Bytes,
) -> Result<ApiResponse<Value>, AppError> {
    let start = Instant::now();
    let payload = payload_from(&body);

    let Some(execution_id) = state
        .http_triggers
        .dispatch(&user_id, method.as_str(), &path, payload)
        .await?
    else {
        return Err(AppError::NotFound(format!("no trigger for {method} /{path}")));
    };

    tracing::info!(user_id = %user_id, %method, path = %path, %execution_id, "http trigger fired");
    Ok(ApiResponse::success(json!({ "execution_id": execution_id, "status": "pending" }), start)
        .with_status(StatusCode::ACCEPTED)
        .with_link("execution", &format!("/api/v1/executions/{execution_id}")))
}
