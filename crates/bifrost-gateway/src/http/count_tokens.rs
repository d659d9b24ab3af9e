use axum::Json;
use serde_json::{json, Value};

use bifrost_core::types::MessagesRequest;

/// POST /v1/messages/count_tokens — local estimate, no upstream call.
pub async fn count_tokens_handler(Json(req): Json<MessagesRequest>) -> Json<Value> {
    let input_tokens = bifrost_tokens::estimate_request(&req);
    Json(json!({ "input_tokens": input_tokens }))
}
