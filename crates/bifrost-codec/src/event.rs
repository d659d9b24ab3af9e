//! Maps decoded frames onto the typed event vocabulary the stream
//! pipeline consumes. The `:event-type` header names the event; the
//! JSON payload carries its fields. Frames without a recognizable
//! mapping are dropped with a debug log rather than failing the stream.

use serde_json::Value;
use tracing::debug;

use crate::frame::Frame;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    AssistantText {
        content: String,
    },
    ToolUseStart {
        tool_use_id: String,
        name: String,
    },
    ToolUseInputDelta {
        tool_use_id: String,
        json_fragment: String,
    },
    ToolUseStop {
        tool_use_id: String,
    },
    MessageStop {
        reason: String,
    },
    Usage {
        input: u32,
        output: u32,
    },
    Error {
        kind: String,
        message: String,
    },
}

/// Translate one frame into zero or more events.
///
/// An aggregated tool-use frame (id, name, full input, and `stop` all
/// in one) decomposes into start / input-delta / stop so downstream
/// consumers see a single event grammar either way.
pub fn parse_events(frame: &Frame) -> Vec<ParsedEvent> {
    if let Some(kind) = frame.exception_type() {
        let message = frame
            .payload_json()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());
        return vec![ParsedEvent::Error {
            kind: kind.to_string(),
            message,
        }];
    }

    let Some(payload) = frame.payload_json() else {
        debug!(
            event_type = frame.event_type().unwrap_or("<none>"),
            len = frame.payload.len(),
            "frame payload is not JSON, skipping"
        );
        return Vec::new();
    };

    match frame.event_type() {
        Some("messageMetadataEvent") => usage_events(&payload),
        Some("messageStopEvent") => vec![ParsedEvent::MessageStop {
            reason: str_field(&payload, "stopReason").unwrap_or_else(|| "end_turn".to_string()),
        }],
        Some("errorEvent") | Some("error") => vec![ParsedEvent::Error {
            kind: str_field(&payload, "type").unwrap_or_else(|| "upstream_error".to_string()),
            message: str_field(&payload, "message").unwrap_or_default(),
        }],
        // assistantResponseEvent / toolUseEvent, and header-less frames:
        // dispatch on the payload fields themselves.
        _ => payload_events(&payload),
    }
}

fn payload_events(payload: &Value) -> Vec<ParsedEvent> {
    if let Some(tool_use_id) = str_field(payload, "toolUseId") {
        return tool_events(payload, tool_use_id);
    }
    if let Some(content) = str_field(payload, "content") {
        return vec![ParsedEvent::AssistantText { content }];
    }
    if let Some(reason) = str_field(payload, "stopReason") {
        return vec![ParsedEvent::MessageStop { reason }];
    }
    if payload.get("inputTokens").is_some() || payload.get("totalInputTokens").is_some() {
        return usage_events(payload);
    }
    debug!("unrecognized upstream payload, skipping");
    Vec::new()
}

fn tool_events(payload: &Value, tool_use_id: String) -> Vec<ParsedEvent> {
    let name = str_field(payload, "name");
    let input = match payload.get("input") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => None,
    };
    let stop = payload.get("stop").and_then(Value::as_bool).unwrap_or(false);

    let mut events = Vec::new();
    if let Some(name) = name {
        events.push(ParsedEvent::ToolUseStart {
            tool_use_id: tool_use_id.clone(),
            name,
        });
    }
    if let Some(fragment) = input {
        if !fragment.is_empty() {
            events.push(ParsedEvent::ToolUseInputDelta {
                tool_use_id: tool_use_id.clone(),
                json_fragment: fragment,
            });
        }
    }
    if stop {
        events.push(ParsedEvent::ToolUseStop { tool_use_id });
    }
    events
}

fn usage_events(payload: &Value) -> Vec<ParsedEvent> {
    let input = u32_field(payload, "inputTokens")
        .or_else(|| u32_field(payload, "totalInputTokens"))
        .unwrap_or(0);
    let output = u32_field(payload, "outputTokens")
        .or_else(|| u32_field(payload, "totalOutputTokens"))
        .unwrap_or(0);
    vec![ParsedEvent::Usage { input, output }]
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u32_field(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(Value::as_u64).map(|v| v as u32)
}
