//! Shared message model: the Anthropic Messages shapes are the lingua
//! franca inside the proxy. The OpenAI surface normalizes into these,
//! and the upstream payload is built from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Message content on the wire is either a plain string or a block
/// array; both normalize to the same variant set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// View as a block list, wrapping plain text in a single text block.
    pub fn as_blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// String or nested block array; kept raw and flattened on use.
        content: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    /// Text carried by a tool_result, whether it came as a string or as
    /// a nested `[{type:text,...}]` array.
    pub fn tool_result_text(content: &Value) -> String {
        match content {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| {
                    item.get("text").and_then(Value::as_str).or_else(|| item.as_str())
                })
                .collect::<Vec<_>>()
                .join(""),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Tool declaration in Anthropic form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

/// Anthropic Messages API request body. Also the body of
/// `/v1/messages/count_tokens` (which ignores the generation knobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<MessageContent>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl MessagesRequest {
    pub fn system_text(&self) -> Option<String> {
        self.system.as_ref().map(MessageContent::text).filter(|s| !s.is_empty())
    }
}

fn default_max_tokens() -> u32 {
    4096
}

/// Anthropic Messages API response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: Role,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// Token usage in Anthropic form. The OpenAI form aliases the fields
/// and carries a recomputed total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn to_openai(self) -> OpenAiUsage {
        OpenAiUsage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl OpenAiUsage {
    pub fn to_anthropic(self) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_accepts_string_and_blocks() {
        let plain: Message =
            serde_json::from_str(r#"{"role":"user","content":"hello"}"#).unwrap();
        assert_eq!(plain.content.text(), "hello");
        assert_eq!(plain.content.as_blocks().len(), 1);

        let blocks: Message = serde_json::from_str(
            r#"{"role":"user","content":[
                {"type":"text","text":"look: "},
                {"type":"image","source":{"type":"base64","media_type":"image/png","data":"aWc="}},
                {"type":"tool_result","tool_use_id":"t1","content":"42"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(blocks.content.text(), "look: ");
        assert_eq!(blocks.content.as_blocks().len(), 3);
    }

    #[test]
    fn tool_result_text_flattens_nested_blocks() {
        let nested = serde_json::json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]);
        assert_eq!(ContentBlock::tool_result_text(&nested), "ab");
        assert_eq!(
            ContentBlock::tool_result_text(&Value::String("plain".into())),
            "plain"
        );
    }

    #[test]
    fn usage_totals_recomputed_on_conversion() {
        let usage = Usage::new(120, 34);
        let openai = usage.to_openai();
        assert_eq!(openai.total_tokens, openai.prompt_tokens + openai.completion_tokens);
        assert_eq!(openai.to_anthropic(), usage);
    }

    #[test]
    fn tool_use_round_trips() {
        let json = r#"{"type":"tool_use","id":"t1","name":"get_weather","input":{"city":"SF"}}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        match &block {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "SF");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        let back = serde_json::to_value(&block).unwrap();
        assert_eq!(back["type"], "tool_use");
    }
}
