use thiserror::Error;

#[derive(Debug, Error)]
pub enum BifrostError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No credential available: {0}")]
    NoCredentialAvailable(String),

    #[error("Upstream error ({status}): {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed frame: {0}")]
    FrameMalformed(String),

    #[error("Corrupt frame: {0}")]
    FrameCorrupt(String),

    #[error("Tool validation failed: {0}")]
    ToolValidation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BifrostError {
    /// Stable kind string sent to clients in `{"error":{"type":...}}`.
    pub fn kind(&self) -> &'static str {
        match self {
            BifrostError::InvalidRequest(_) => "invalid_request_error",
            BifrostError::InvalidContent(_) => "invalid_content_error",
            BifrostError::Unauthorized(_) => "authentication_error",
            BifrostError::NoCredentialAvailable(_) => "no_credential_available",
            BifrostError::UpstreamError { .. } => "upstream_error",
            BifrostError::UpstreamUnavailable(_) => "upstream_unavailable",
            BifrostError::FrameMalformed(_) => "frame_malformed",
            BifrostError::FrameCorrupt(_) => "frame_corrupt",
            BifrostError::ToolValidation(_) => "tool_validation_error",
            BifrostError::Serialization(_) => "invalid_request_error",
            BifrostError::Config(_) => "config_error",
            BifrostError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for errors surfaced before the first streamed byte.
    pub fn status(&self) -> u16 {
        match self {
            BifrostError::InvalidRequest(_)
            | BifrostError::InvalidContent(_)
            | BifrostError::Serialization(_)
            | BifrostError::ToolValidation(_) => 400,
            BifrostError::Unauthorized(_) => 401,
            BifrostError::NoCredentialAvailable(_) => 503,
            BifrostError::UpstreamError { .. } => 502,
            BifrostError::UpstreamUnavailable(_) => 504,
            BifrostError::FrameMalformed(_)
            | BifrostError::FrameCorrupt(_)
            | BifrostError::Config(_)
            | BifrostError::Internal(_) => 500,
        }
    }

    /// Client-facing JSON body: `{"error":{"type":..., "message":...}}`.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

pub type Result<T> = std::result::Result<T, BifrostError>;
