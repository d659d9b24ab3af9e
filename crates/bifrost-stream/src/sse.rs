//! Client-facing stream events in the Anthropic SSE vocabulary.
//! Wire format: `event: <name>\ndata: <json>\n\n`.

use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: &'static str,
    pub data: Value,
}

impl SseEvent {
    pub fn message_start(message_id: &str, model: &str, input_tokens: u32) -> Self {
        Self {
            event: "message_start",
            data: json!({
                "type": "message_start",
                "message": {
                    "id": message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": { "input_tokens": input_tokens, "output_tokens": 0 },
                },
            }),
        }
    }

    pub fn content_block_start(index: u32, content_block: Value) -> Self {
        Self {
            event: "content_block_start",
            data: json!({
                "type": "content_block_start",
                "index": index,
                "content_block": content_block,
            }),
        }
    }

    pub fn text_delta(index: u32, text: &str) -> Self {
        Self {
            event: "content_block_delta",
            data: json!({
                "type": "content_block_delta",
                "index": index,
                "delta": { "type": "text_delta", "text": text },
            }),
        }
    }

    pub fn input_json_delta(index: u32, partial_json: &str) -> Self {
        Self {
            event: "content_block_delta",
            data: json!({
                "type": "content_block_delta",
                "index": index,
                "delta": { "type": "input_json_delta", "partial_json": partial_json },
            }),
        }
    }

    pub fn content_block_stop(index: u32) -> Self {
        Self {
            event: "content_block_stop",
            data: json!({ "type": "content_block_stop", "index": index }),
        }
    }

    pub fn message_delta(stop_reason: &str, output_tokens: u32) -> Self {
        Self {
            event: "message_delta",
            data: json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": { "output_tokens": output_tokens },
            }),
        }
    }

    pub fn message_stop() -> Self {
        Self {
            event: "message_stop",
            data: json!({ "type": "message_stop" }),
        }
    }

    pub fn ping() -> Self {
        Self {
            event: "ping",
            data: json!({ "type": "ping" }),
        }
    }

    pub fn error(error_type: &str, message: &str) -> Self {
        Self {
            event: "error",
            data: json!({
                "type": "error",
                "error": { "type": error_type, "message": message },
            }),
        }
    }

    pub fn tool_error(message: &str, tool_call_id: &str) -> Self {
        Self {
            event: "error",
            data: json!({
                "type": "error",
                "error": {
                    "type": "tool_error",
                    "message": message,
                    "tool_call_id": tool_call_id,
                },
            }),
        }
    }

    /// Render in SSE wire framing.
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_framing() {
        let ev = SseEvent::ping();
        assert_eq!(ev.to_wire(), "event: ping\ndata: {\"type\":\"ping\"}\n\n");
    }

    #[test]
    fn message_start_carries_input_usage() {
        let ev = SseEvent::message_start("msg_1", "claude-sonnet-4-20250514", 42);
        assert_eq!(ev.data["message"]["usage"]["input_tokens"], 42);
        assert_eq!(ev.data["message"]["role"], "assistant");
    }
}
