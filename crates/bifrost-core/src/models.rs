//! Model catalog — maps client-facing model ids to the upstream model
//! identifiers and carries the metadata served by `GET /v1/models`.

use serde::Serialize;

pub struct KnownModel {
    /// Client-facing id (Anthropic naming).
    pub id: &'static str,
    pub display_name: &'static str,
    /// Identifier the upstream wire protocol expects.
    pub upstream_id: &'static str,
    pub max_tokens: u32,
    /// Unix timestamp for the `created` field in listings.
    pub created: i64,
}

pub const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        id: "claude-sonnet-4-20250514",
        display_name: "Claude Sonnet 4",
        upstream_id: "CLAUDE_SONNET_4_20250514_V1_0",
        max_tokens: 64_000,
        created: 1_747_180_800,
    },
    KnownModel {
        id: "claude-3-7-sonnet-20250219",
        display_name: "Claude 3.7 Sonnet",
        upstream_id: "CLAUDE_3_7_SONNET_20250219_V1_0",
        max_tokens: 64_000,
        created: 1_739_923_200,
    },
    KnownModel {
        id: "claude-3-5-haiku-20241022",
        display_name: "Claude 3.5 Haiku",
        upstream_id: "CLAUDE_3_5_HAIKU_20241022_V1_0",
        max_tokens: 8_192,
        created: 1_729_555_200,
    },
];

/// Resolve the upstream model identifier. Unknown ids fall back to the
/// first catalog entry so stray client model strings still route.
pub fn upstream_model_id(client_id: &str) -> &'static str {
    KNOWN_MODELS
        .iter()
        .find(|m| m.id == client_id)
        .unwrap_or(&KNOWN_MODELS[0])
        .upstream_id
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
    pub display_name: String,
    #[serde(rename = "type")]
    pub model_type: &'static str,
    pub max_tokens: u32,
}

/// Body of `GET /v1/models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

pub fn model_list() -> ModelList {
    ModelList {
        object: "list",
        data: KNOWN_MODELS
            .iter()
            .map(|m| ModelEntry {
                id: m.id.to_string(),
                object: "model",
                created: m.created,
                owned_by: "anthropic",
                display_name: m.display_name.to_string(),
                model_type: "model",
                max_tokens: m.max_tokens,
            })
            .collect(),
    }
}
