//! Client bearer authentication for the /v1 surface.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use bifrost_core::error::BifrostError;

use crate::app::{ApiError, AppState};

pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            ApiError(BifrostError::Unauthorized(
                "missing bearer token".to_string(),
            ))
        })?;

    if !token_matches(presented, &state.config.service_config.client_token) {
        warn!(path = %request.uri().path(), "rejected request with wrong client token");
        return Err(ApiError(BifrostError::Unauthorized(
            "invalid client token".to_string(),
        )));
    }
    Ok(next.run(request).await)
}

/// Constant-time comparison. Length still leaks, content never does.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}
