use axum::Json;

use bifrost_core::models::{model_list, ModelList};

/// GET /v1/models — static catalog.
pub async fn models_handler() -> Json<ModelList> {
    Json(model_list())
}
