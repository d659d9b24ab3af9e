//! Builds the upstream `conversationState` request payload from an
//! Anthropic-shaped request. The upstream wants one "current" user
//! message plus alternating history, with tools and previous-turn tool
//! results tucked into the current message's context object.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::debug;

use bifrost_core::error::{BifrostError, Result};
use bifrost_core::models;
use bifrost_core::types::{ContentBlock, Message, MessagesRequest, Role};

use crate::image;

const CHAT_TRIGGER_TYPE: &str = "MANUAL";
const ORIGIN: &str = "AI_EDITOR";

/// System prompts are folded into the current user content with this
/// separator, since the upstream has no system slot.
const SYSTEM_SEPARATOR: &str = "\n\n";

/// Per-request builder. Carries the tool-use dedup set: the upstream
/// rejects conversations that repeat a toolUseId, so a repeated
/// tool_use block for an id we already forwarded is dropped silently.
pub struct UpstreamPayloadBuilder {
    conversation_id: String,
    profile_arn: String,
    forwarded_tool_uses: HashSet<String>,
}

impl UpstreamPayloadBuilder {
    pub fn new(profile_arn: impl Into<String>) -> Self {
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            profile_arn: profile_arn.into(),
            forwarded_tool_uses: HashSet::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Build the full upstream request body.
    pub fn build(&mut self, req: &MessagesRequest) -> Result<Value> {
        let (history_msgs, current) = split_current(&req.messages)?;

        let mut history = Vec::with_capacity(history_msgs.len());
        for msg in history_msgs {
            history.push(self.history_entry(msg, &req.model)?);
        }

        let mut content = current_text(current);
        if let Some(system) = req.system_text() {
            content = format!("{system}{SYSTEM_SEPARATOR}{content}");
        }

        let mut user_input_message = json!({
            "content": content,
            "modelId": models::upstream_model_id(&req.model),
            "origin": ORIGIN,
        });

        let images = image_entries(current)?;
        if !images.is_empty() {
            user_input_message["images"] = Value::Array(images);
        }

        let tool_results = tool_result_entries(current);
        let tools = tool_entries(req);
        if !tool_results.is_empty() || !tools.is_empty() {
            user_input_message["userInputMessageContext"] = json!({
                "toolResults": tool_results,
                "tools": tools,
            });
        }

        Ok(json!({
            "conversationState": {
                "chatTriggerType": CHAT_TRIGGER_TYPE,
                "conversationId": self.conversation_id,
                "currentMessage": { "userInputMessage": user_input_message },
                "history": history,
            },
            "profileArn": self.profile_arn,
        }))
    }

    fn history_entry(&mut self, msg: &Message, model: &str) -> Result<Value> {
        match msg.role {
            Role::User | Role::System => Ok(json!({
                "userInputMessage": {
                    "content": current_text(msg),
                    "modelId": models::upstream_model_id(model),
                    "origin": ORIGIN,
                }
            })),
            Role::Assistant => {
                let mut tool_uses = Vec::new();
                for block in msg.content.as_blocks() {
                    if let ContentBlock::ToolUse { id, name, input } = block {
                        if !self.forwarded_tool_uses.insert(id.clone()) {
                            debug!(tool_use_id = %id, "dropping repeated tool_use block");
                            continue;
                        }
                        tool_uses.push(json!({
                            "toolUseId": id,
                            "name": name,
                            "input": input,
                        }));
                    }
                }
                let mut entry = json!({
                    "assistantResponseMessage": { "content": msg.content.text() }
                });
                if !tool_uses.is_empty() {
                    entry["assistantResponseMessage"]["toolUses"] = Value::Array(tool_uses);
                }
                Ok(entry)
            }
        }
    }
}

/// The last user-role message is the "current" one; everything before
/// it is history. A request whose last turn is not a user turn has
/// nothing to send upstream.
fn split_current(messages: &[Message]) -> Result<(&[Message], &Message)> {
    let idx = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .ok_or_else(|| {
            BifrostError::InvalidRequest("request contains no user message".to_string())
        })?;
    if idx != messages.len() - 1 {
        return Err(BifrostError::InvalidRequest(
            "the final message must be a user turn".to_string(),
        ));
    }
    Ok((&messages[..idx], &messages[idx]))
}

/// User-visible text of a message: text blocks plus the text carried
/// inside tool_result blocks, concatenated.
fn current_text(msg: &Message) -> String {
    let mut out = String::new();
    for block in msg.content.as_blocks() {
        match block {
            ContentBlock::Text { text } => out.push_str(&text),
            ContentBlock::ToolResult { content, .. } => {
                out.push_str(&ContentBlock::tool_result_text(&content));
            }
            _ => {}
        }
    }
    out
}

fn image_entries(msg: &Message) -> Result<Vec<Value>> {
    let mut entries = Vec::new();
    for block in msg.content.as_blocks() {
        if let ContentBlock::Image { source } = block {
            image::validate(&source.media_type, &source.data)?;
            entries.push(json!({
                "format": image::subtype(&source.media_type),
                "source": { "bytes": source.data },
            }));
        }
    }
    Ok(entries)
}

/// Previous-turn tool results travel in the context object, with their
/// content wrapped as a one-element text list.
fn tool_result_entries(msg: &Message) -> Vec<Value> {
    msg.content
        .as_blocks()
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(json!({
                "toolUseId": tool_use_id,
                "content": [{ "text": ContentBlock::tool_result_text(&content) }],
                "status": if is_error.unwrap_or(false) { "error" } else { "success" },
            })),
            _ => None,
        })
        .collect()
}

fn tool_entries(req: &MessagesRequest) -> Vec<Value> {
    req.tools
        .iter()
        .map(|tool| {
            json!({
                "toolSpecification": {
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": { "json": tool.input_schema },
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_core::types::{ImageSource, MessageContent, ToolDefinition};

    fn user(text: &str) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    fn assistant_with_tool(text: &str, id: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text { text: text.into() },
                ContentBlock::ToolUse {
                    id: id.into(),
                    name: "get_weather".into(),
                    input: serde_json::json!({"city": "SF"}),
                },
            ]),
        }
    }

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 1024,
            system: None,
            messages,
            tools: Vec::new(),
            stream: false,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }

    #[test]
    fn folds_history_and_current() {
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let req = request(vec![
            user("first question"),
            assistant_with_tool("checking", "t1"),
            user("second question"),
        ]);
        let payload = builder.build(&req).unwrap();

        let state = &payload["conversationState"];
        assert_eq!(state["chatTriggerType"], "MANUAL");
        assert_eq!(state["history"].as_array().unwrap().len(), 2);
        assert_eq!(
            state["history"][1]["assistantResponseMessage"]["toolUses"][0]["toolUseId"],
            "t1"
        );
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["content"],
            "second question"
        );
        assert_eq!(
            state["currentMessage"]["userInputMessage"]["modelId"],
            "CLAUDE_SONNET_4_20250514_V1_0"
        );
        assert_eq!(payload["profileArn"], "arn:test");
    }

    #[test]
    fn system_prompt_prepended_to_current() {
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let mut req = request(vec![user("hello")]);
        req.system = Some(MessageContent::Text("be terse".into()));
        let payload = builder.build(&req).unwrap();
        assert_eq!(
            payload["conversationState"]["currentMessage"]["userInputMessage"]["content"],
            "be terse\n\nhello"
        );
    }

    #[test]
    fn tool_results_go_into_context() {
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let req = request(vec![
            assistant_with_tool("checking", "t1"),
            Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: serde_json::json!("sunny, 21C"),
                    is_error: None,
                }]),
            },
        ]);
        let payload = builder.build(&req).unwrap();
        let ctx = &payload["conversationState"]["currentMessage"]["userInputMessage"]
            ["userInputMessageContext"];
        assert_eq!(ctx["toolResults"][0]["toolUseId"], "t1");
        assert_eq!(ctx["toolResults"][0]["content"][0]["text"], "sunny, 21C");
        assert_eq!(ctx["toolResults"][0]["status"], "success");
    }

    #[test]
    fn tool_catalog_serialized_as_specifications() {
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let mut req = request(vec![user("hi")]);
        req.tools = vec![ToolDefinition {
            name: "read".into(),
            description: "Read a file".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        let payload = builder.build(&req).unwrap();
        let tools = &payload["conversationState"]["currentMessage"]["userInputMessage"]
            ["userInputMessageContext"]["tools"];
        assert_eq!(tools[0]["toolSpecification"]["name"], "read");
        assert_eq!(
            tools[0]["toolSpecification"]["inputSchema"]["json"]["type"],
            "object"
        );
    }

    #[test]
    fn repeated_tool_use_id_dropped() {
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let req = request(vec![
            assistant_with_tool("a", "dup"),
            user("ok"),
        ]);
        builder.build(&req).unwrap();

        // same id resent on a later build of the same conversation
        let req2 = request(vec![
            assistant_with_tool("a", "dup"),
            assistant_with_tool("b", "fresh"),
            user("next"),
        ]);
        let payload = builder.build(&req2).unwrap();
        let history = payload["conversationState"]["history"].as_array().unwrap();
        assert!(history[0]["assistantResponseMessage"].get("toolUses").is_none());
        assert_eq!(
            history[1]["assistantResponseMessage"]["toolUses"][0]["toolUseId"],
            "fresh"
        );
    }

    #[test]
    fn images_validated_and_reshaped() {
        let png = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0],
        );
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let req = request(vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text { text: "see".into() },
                ContentBlock::Image {
                    source: ImageSource::base64("image/png", png.clone()),
                },
            ]),
        }]);
        let payload = builder.build(&req).unwrap();
        let images = &payload["conversationState"]["currentMessage"]["userInputMessage"]["images"];
        assert_eq!(images[0]["format"], "png");
        assert_eq!(images[0]["source"]["bytes"], png.as_str());
    }

    #[test]
    fn trailing_assistant_turn_rejected() {
        let mut builder = UpstreamPayloadBuilder::new("arn:test");
        let req = request(vec![user("q"), assistant_with_tool("a", "t")]);
        assert!(builder.build(&req).is_err());
    }
}
