//! HTTP route handlers

pub mod health;
pub mod listings;
pub mod metrics;
pub mod reports;
pub mod worker;

use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::http::HeaderMap;
use uuid::Uuid;

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the caller when a token is presented. No token means an
/// anonymous caller; a token that fails verification is an error.
pub async fn authenticate_optional(state: &AppState, headers: &HeaderMap) -> Result<Option<Uuid>> {
    match extract_bearer_token(headers) {
        Some(token) => Ok(Some(state.db.verify_session(token).await?)),
        None => Ok(None),
    }
}

/// Resolve the caller, rejecting anonymous requests
pub async fn authenticate_required(state: &AppState, headers: &HeaderMap) -> Result<Uuid> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;
    state.db.verify_session(token).await
}
