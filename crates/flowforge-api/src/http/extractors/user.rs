//! Caller identity extractor.
//!
//! The engine does no authentication of its own; the caller (usually a
//! gateway in front of it) names the user in the `X-User-Id` header and
//! every workflow, execution and approval is scoped to that user.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::AppError;

pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing X-User-Id header".to_string()))?;
        let user = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("invalid X-User-Id header encoding".to_string()))?
            .trim();
        if user.is_empty() {
            return Err(AppError::Unauthorized("empty X-User-Id header".to_string()));
        }
        Ok(UserId(user.to_string()))
    }
}
