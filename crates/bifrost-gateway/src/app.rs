use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use bifrost_core::error::BifrostError;
use bifrost_core::BifrostConfig;
use bifrost_pool::CredentialPool;
use bifrost_upstream::{ClientProfiles, UpstreamClient, UpstreamEndpoints};

/// Central shared state — passed as Arc<AppState> to all handlers.
/// The pool, the client profiles, and their metrics are created once
/// here and never restructured; per-credential state mutates inside
/// the pool's own locks.
pub struct AppState {
    pub config: BifrostConfig,
    pub pool: Arc<CredentialPool>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(config: BifrostConfig) -> Self {
        let upstream = Arc::new(UpstreamClient::new(
            ClientProfiles::new(&config.timeout_config),
            UpstreamEndpoints::default(),
        ));
        let pool = Arc::new(CredentialPool::new(&config.auth_tokens, upstream.clone()));
        Self {
            config,
            pool,
            upstream,
        }
    }
}

/// Assemble the full router. Everything under /v1 requires the client
/// bearer token; /health does not.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/messages", post(crate::http::messages::messages_handler))
        .route(
            "/v1/chat/completions",
            post(crate::http::openai_compat::chat_completions),
        )
        .route(
            "/v1/messages/count_tokens",
            post(crate::http::count_tokens::count_tokens_handler),
        )
        .route("/v1/models", get(crate::http::models::models_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .merge(protected)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}

/// Axum-facing error wrapper: `{"error":{"type","message"}}` with the
/// error's HTTP status.
pub struct ApiError(pub BifrostError);

impl From<BifrostError> for ApiError {
    fn from(e: BifrostError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_body())).into_response()
    }
}
