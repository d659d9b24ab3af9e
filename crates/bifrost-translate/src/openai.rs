//! OpenAI Chat Completions surface: request normalization into the
//! Anthropic message model, and response folding back out. The proxy
//! speaks Anthropic internally; everything OpenAI-shaped stops here.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use bifrost_core::error::{BifrostError, Result};
use bifrost_core::types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, MessagesResponse,
    OpenAiUsage, Role, ToolDefinition,
};

use crate::image;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionsRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub tools: Vec<OpenAiTool>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Newer alias for max_tokens; wins when both are present.
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    /// Present on `role:"tool"` result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    /// JSON-encoded argument object, per OpenAI convention.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn function_type() -> String {
    "function".to_string()
}

fn empty_object() -> Value {
    serde_json::json!({})
}

impl ChatCompletionsRequest {
    /// Normalize into the Anthropic request shape the rest of the
    /// proxy operates on. System messages fold into the system prompt,
    /// tool messages become tool_result user blocks, and data-URL
    /// images are validated and re-encoded as Anthropic image blocks.
    pub fn into_messages_request(self) -> Result<MessagesRequest> {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<Message> = Vec::new();

        for msg in self.messages {
            match msg.role.as_str() {
                "system" | "developer" => {
                    if let Some(content) = msg.content {
                        system_parts.push(content_text(&content));
                    }
                }
                "user" => messages.push(Message {
                    role: Role::User,
                    content: convert_user_content(msg.content)?,
                }),
                "assistant" => messages.push(convert_assistant_message(msg)?),
                "tool" => {
                    let tool_use_id = msg.tool_call_id.ok_or_else(|| {
                        BifrostError::InvalidRequest(
                            "tool message is missing tool_call_id".to_string(),
                        )
                    })?;
                    let text = msg.content.map(|c| content_text(&c)).unwrap_or_default();
                    let block = ContentBlock::ToolResult {
                        tool_use_id,
                        content: Value::String(text),
                        is_error: None,
                    };
                    // Anthropic carries tool results on the next user turn.
                    match messages.last_mut() {
                        Some(Message {
                            role: Role::User,
                            content: MessageContent::Blocks(blocks),
                        }) if blocks
                            .iter()
                            .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                        {
                            blocks.push(block)
                        }
                        _ => messages.push(Message {
                            role: Role::User,
                            content: MessageContent::Blocks(vec![block]),
                        }),
                    }
                }
                other => {
                    return Err(BifrostError::InvalidRequest(format!(
                        "unsupported message role '{other}'"
                    )))
                }
            }
        }

        let tools = self
            .tools
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.function.name,
                description: t.function.description,
                input_schema: t.function.parameters,
            })
            .collect();

        Ok(MessagesRequest {
            model: self.model,
            max_tokens: self.max_completion_tokens.or(self.max_tokens).unwrap_or(4096),
            system: (!system_parts.is_empty())
                .then(|| MessageContent::Text(system_parts.join("\n\n"))),
            messages,
            tools,
            stream: self.stream,
            temperature: self.temperature,
            top_p: self.top_p,
            stop_sequences: Vec::new(),
        })
    }
}

fn convert_user_content(content: Option<OpenAiContent>) -> Result<MessageContent> {
    match content {
        None => Ok(MessageContent::Text(String::new())),
        Some(OpenAiContent::Text(text)) => Ok(MessageContent::Text(text)),
        Some(OpenAiContent::Parts(parts)) => {
            let mut blocks = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    OpenAiContentPart::Text { text } => {
                        blocks.push(ContentBlock::Text { text })
                    }
                    OpenAiContentPart::ImageUrl { image_url } => {
                        blocks.push(convert_data_url(&image_url.url)?)
                    }
                }
            }
            Ok(MessageContent::Blocks(blocks))
        }
    }
}

/// `data:image/png;base64,....` → Anthropic image block. Remote URLs
/// are rejected: the proxy does not fetch on the client's behalf.
fn convert_data_url(url: &str) -> Result<ContentBlock> {
    let rest = url.strip_prefix("data:").ok_or_else(|| {
        BifrostError::InvalidContent("image_url must be a data: URL".to_string())
    })?;
    let (media_type, data) = rest.split_once(";base64,").ok_or_else(|| {
        BifrostError::InvalidContent("image data URL must be base64-encoded".to_string())
    })?;

    image::validate(media_type, data)?;
    Ok(ContentBlock::Image {
        source: ImageSource::base64(media_type, data),
    })
}

fn convert_assistant_message(msg: OpenAiMessage) -> Result<Message> {
    let mut blocks: Vec<ContentBlock> = Vec::new();
    if let Some(content) = msg.content {
        let text = content_text(&content);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
    }
    for call in msg.tool_calls.unwrap_or_default() {
        let input: Value = if call.function.arguments.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
                warn!(id = %call.id, error = %e, "tool call arguments are not valid JSON");
                Value::String(call.function.arguments.clone())
            })
        };
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }
    Ok(Message {
        role: Role::Assistant,
        content: MessageContent::Blocks(blocks),
    })
}

fn content_text(content: &OpenAiContent) -> String {
    match content {
        OpenAiContent::Text(text) => text.clone(),
        OpenAiContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                OpenAiContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

// ── Response folding ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionsResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
    pub finish_reason: Option<String>,
}

pub fn map_finish_reason(stop_reason: &str) -> &'static str {
    match stop_reason {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        // end_turn, error, and anything unrecognized read as a clean stop
        _ => "stop",
    }
}

/// Fold a complete Anthropic response into the OpenAI response shape:
/// all text joins into one message, tool_use blocks become tool_calls.
pub fn to_chat_completions(resp: &MessagesResponse) -> ChatCompletionsResponse {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

    for block in &resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAiToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: OpenAiFunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            _ => {}
        }
    }

    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(map_finish_reason)
        .unwrap_or("stop");

    ChatCompletionsResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: resp.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: Some(OpenAiMessage {
                role: "assistant".to_string(),
                content: Some(OpenAiContent::Text(text_parts.concat())),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }),
            delta: None,
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: Some(resp.usage.to_openai()),
    }
}

/// One streaming chunk on the OpenAI surface.
pub fn chunk(id: &str, model: &str, delta: Value, finish_reason: Option<&str>) -> Value {
    serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUg=="; // PNG magic + padding

    fn openai_request(messages: Value) -> ChatCompletionsRequest {
        serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "messages": messages,
        }))
        .unwrap()
    }

    #[test]
    fn system_and_user_roles_map() {
        let req = openai_request(serde_json::json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hi"},
        ]));
        let anthropic = req.into_messages_request().unwrap();
        assert_eq!(anthropic.system_text().as_deref(), Some("be brief"));
        assert_eq!(anthropic.messages.len(), 1);
        assert_eq!(anthropic.messages[0].role, Role::User);
    }

    #[test]
    fn data_url_image_becomes_image_block() {
        let url = format!("data:image/png;base64,{PNG_B64}");
        let req = openai_request(serde_json::json!([
            {"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": url}},
            ]},
        ]));
        let anthropic = req.into_messages_request().unwrap();
        let blocks = anthropic.messages[0].content.as_blocks();
        match &blocks[1] {
            ContentBlock::Image { source } => {
                assert_eq!(source.media_type, "image/png");
                // data is everything after the comma, untouched
                assert_eq!(source.data, PNG_B64);
            }
            other => panic!("expected image block, got {other:?}"),
        }
    }

    #[test]
    fn remote_image_url_rejected() {
        let req = openai_request(serde_json::json!([
            {"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
            ]},
        ]));
        assert!(req.into_messages_request().is_err());
    }

    #[test]
    fn tool_messages_become_tool_result_blocks() {
        let req = openai_request(serde_json::json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "get_weather", "arguments": "{\"city\":\"SF\"}"}},
            ]},
            {"role": "tool", "tool_call_id": "call_1", "content": "sunny"},
        ]));
        let anthropic = req.into_messages_request().unwrap();
        assert_eq!(anthropic.messages.len(), 3);

        let assistant_blocks = anthropic.messages[1].content.as_blocks();
        match &assistant_blocks[0] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "SF");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }

        let result_blocks = anthropic.messages[2].content.as_blocks();
        match &result_blocks[0] {
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                assert_eq!(tool_use_id, "call_1");
                assert_eq!(content.as_str(), Some("sunny"));
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("end_turn"), "stop");
        assert_eq!(map_finish_reason("tool_use"), "tool_calls");
        assert_eq!(map_finish_reason("max_tokens"), "length");
        assert_eq!(map_finish_reason("error"), "stop");
    }

    #[test]
    fn response_folds_text_and_tool_calls() {
        let resp = MessagesResponse {
            id: "msg_1".into(),
            response_type: "message".into(),
            role: Role::Assistant,
            model: "claude-sonnet-4-20250514".into(),
            content: vec![
                ContentBlock::Text { text: "Let me check. ".into() },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "get_weather".into(),
                    input: serde_json::json!({"city": "SF"}),
                },
                ContentBlock::Text { text: "One moment.".into() },
            ],
            stop_reason: Some("tool_use".into()),
            stop_sequence: None,
            usage: bifrost_core::types::Usage::new(10, 20),
        };

        let openai = to_chat_completions(&resp);
        assert_eq!(openai.choices.len(), 1);
        let choice = &openai.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let message = choice.message.as_ref().unwrap();
        match message.content.as_ref().unwrap() {
            OpenAiContent::Text(text) => assert_eq!(text, "Let me check. One moment."),
            other => panic!("expected text content, got {other:?}"),
        }
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(openai.usage.unwrap().total_tokens, 30);
    }

    /// Round-trip: OpenAI → Anthropic → OpenAI keeps text, tool calls,
    /// and results intact for loss-free fields.
    #[test]
    fn round_trip_preserves_content() {
        let req = openai_request(serde_json::json!([
            {"role": "user", "content": "weather in SF?"},
            {"role": "assistant", "content": "Checking.", "tool_calls": [
                {"id": "call_9", "type": "function",
                 "function": {"name": "get_weather", "arguments": "{\"city\":\"SF\"}"}},
            ]},
        ]));
        let anthropic = req.into_messages_request().unwrap();

        // fold the assistant turn back out through the response path
        let resp = MessagesResponse {
            id: "msg_rt".into(),
            response_type: "message".into(),
            role: Role::Assistant,
            model: "m".into(),
            content: anthropic.messages[1].content.as_blocks(),
            stop_reason: Some("tool_use".into()),
            stop_sequence: None,
            usage: Default::default(),
        };
        let back = to_chat_completions(&resp);
        let message = back.choices[0].message.as_ref().unwrap();
        match message.content.as_ref().unwrap() {
            OpenAiContent::Text(text) => assert_eq!(text, "Checking."),
            other => panic!("unexpected {other:?}"),
        }
        let call = &message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "call_9");
        assert_eq!(
            serde_json::from_str::<Value>(&call.function.arguments).unwrap(),
            serde_json::json!({"city": "SF"})
        );
    }
}
