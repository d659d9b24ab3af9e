//! POST /v1/messages — the Anthropic Messages surface.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, response::Response, Json};
use tracing::info;

use bifrost_core::types::MessagesRequest;

use crate::app::{ApiError, AppState};
use crate::http::relay;

pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MessagesRequest>,
) -> Result<Response, ApiError> {
    info!(model = %req.model, stream = req.stream, "messages request");

    let input_estimate = bifrost_tokens::estimate_request(&req);
    let (lease, response) = relay::open_upstream(&state, &req).await?;

    if req.stream {
        Ok(relay::anthropic_sse(state, req, lease, response, input_estimate).into_response())
    } else {
        let emitter = relay::collect(state, &req, lease, response, input_estimate).await?;
        Ok(Json(emitter.into_response()).into_response())
    }
}
