//! HTTP API surface.
//!
//! Thin axum handlers over the orchestration core. Identity is the
//! surrounding system's job: handlers read the caller from the `X-Owner`
//! header and scope every query to it.

mod personas;
mod routes;
mod sessions;
mod teams;
pub mod types;

pub use routes::{serve, AppState};

use axum::http::{HeaderMap, StatusCode};

use crate::error::OrchestratorError;

/// Caller identity, as asserted by the fronting auth layer.
pub(crate) fn owner_from(headers: &HeaderMap) -> String {
    headers
        .get("x-owner")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("default")
        .to_string()
}

/// Map core errors onto HTTP responses.
pub(crate) fn error_response(err: OrchestratorError) -> (StatusCode, String) {
    let status = match &err {
        OrchestratorError::Validation(msg) if msg.contains("not found") => StatusCode::NOT_FOUND,
        OrchestratorError::Validation(_) | OrchestratorError::Parse(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Credential(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::RateLimited(_) | OrchestratorError::Budget(_) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        OrchestratorError::Provider(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Store-level failures are internal errors.
pub(crate) fn store_error(err: String) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err)
}
