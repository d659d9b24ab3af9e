//! Per-request tool-call lifecycle tracking.
//!
//! The upstream announces tool invocations as loose start / input /
//! stop events. This module pins each invocation to a stable content
//! block index, deduplicates by tool-use id, and emits the strict
//! Anthropic event sequence clients expect. Block index 0 is reserved
//! for the leading text block; tool blocks count up from 1.
//!
//! A start is held back until the next event arrives so the intro text
//! can mention parsed arguments (the upstream sends the tool name
//! first and the arguments in a separate event). Holding one event is
//! invisible to clients — ordering is unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use bifrost_codec::ParsedEvent;

use crate::sse::SseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    /// Accumulated argument JSON fragments, exactly as received.
    pub arguments_json: String,
    /// Best-effort parse of `arguments_json`; empty object until the
    /// fragments form valid JSON.
    pub arguments: Value,
    pub block_index: u32,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Whether content_block_start has gone to the client.
    announced: bool,
}

impl ToolExecution {
    fn new(id: String, name: String, block_index: u32) -> Self {
        Self {
            id,
            name,
            started_at: Utc::now(),
            ended_at: None,
            status: ExecutionStatus::Pending,
            arguments_json: String::new(),
            arguments: json!({}),
            block_index,
            result: None,
            error: None,
            announced: false,
        }
    }

    fn absorb_fragment(&mut self, fragment: &str) {
        self.arguments_json.push_str(fragment);
        if let Ok(parsed) = serde_json::from_str::<Value>(&self.arguments_json) {
            self.arguments = parsed;
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.status, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

/// Required arguments for the built-in tool vocabulary. A miss is
/// logged but never blocks the start event: by the time we see the
/// problem the stream is already committed.
const REQUIRED_ARGS: &[(&str, &[&str])] = &[
    ("bash", &["command"]),
    ("write", &["file_path", "content"]),
    ("read", &["file_path"]),
    ("edit", &["file_path", "old_string", "new_string"]),
];

pub struct ToolLifecycle {
    executions: HashMap<String, ToolExecution>,
    /// Start order, for deterministic draining.
    order: Vec<String>,
    next_block_index: u32,
    text_intro_emitted: bool,
    stop_delta_emitted: bool,
}

impl Default for ToolLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLifecycle {
    pub fn new() -> Self {
        Self {
            executions: HashMap::new(),
            order: Vec::new(),
            next_block_index: 1,
            text_intro_emitted: false,
            stop_delta_emitted: false,
        }
    }

    /// The emitter streamed real assistant text at index 0, so the
    /// synthetic intro must never be emitted.
    pub fn mark_text_emitted(&mut self) {
        self.text_intro_emitted = true;
    }

    /// Whether this manager already emitted the final message_delta.
    pub fn stop_delta_emitted(&self) -> bool {
        self.stop_delta_emitted
    }

    /// Whether the index-0 text block has been used, by the intro or
    /// by real streamed text.
    pub fn text_intro_emitted(&self) -> bool {
        self.text_intro_emitted
    }

    pub fn has_executions(&self) -> bool {
        !self.executions.is_empty()
    }

    /// Hand the emitter a fresh block index (for follow-up text blocks).
    pub fn allocate_block_index(&mut self) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }

    /// Completed executions in start order, as Anthropic tool_use
    /// blocks. Used by the non-streaming fold.
    pub fn tool_use_blocks(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|id| self.executions.get(id))
            .map(|exec| {
                json!({
                    "type": "tool_use",
                    "id": exec.id,
                    "name": exec.name,
                    "input": exec.arguments,
                })
            })
            .collect()
    }

    /// Feed one upstream tool event through the state machine.
    pub fn on_event(&mut self, event: &ParsedEvent) -> Vec<SseEvent> {
        match event {
            ParsedEvent::ToolUseStart { tool_use_id, name } => {
                self.on_start(tool_use_id, name)
            }
            ParsedEvent::ToolUseInputDelta {
                tool_use_id,
                json_fragment,
            } => self.on_input_delta(tool_use_id, json_fragment),
            ParsedEvent::ToolUseStop { tool_use_id } => self.on_stop(tool_use_id),
            _ => Vec::new(),
        }
    }

    fn on_start(&mut self, id: &str, name: &str) -> Vec<SseEvent> {
        if id.is_empty() || name.is_empty() {
            warn!(tool_use_id = %id, name = %name, "tool start with empty id or name, ignoring");
            return Vec::new();
        }
        if let Some(existing) = self.executions.get_mut(id) {
            // duplicate start: refresh the name in place, no event
            debug!(tool_use_id = %id, "duplicate tool start, updating in place");
            existing.name = name.to_string();
            return Vec::new();
        }

        let index = self.allocate_block_index();
        self.executions
            .insert(id.to_string(), ToolExecution::new(id.to_string(), name.to_string(), index));
        self.order.push(id.to_string());
        // Announcement waits for the next event so the intro can see
        // any arguments that arrive right after the start.
        Vec::new()
    }

    fn on_input_delta(&mut self, id: &str, fragment: &str) -> Vec<SseEvent> {
        let announced = match self.executions.get_mut(id) {
            Some(exec) => {
                exec.absorb_fragment(fragment);
                exec.announced
            }
            None => {
                warn!(tool_use_id = %id, "input delta for unknown tool use, dropping");
                return Vec::new();
            }
        };
        if announced {
            let index = self.executions[id].block_index;
            vec![SseEvent::input_json_delta(index, fragment)]
        } else {
            self.announce(id)
        }
    }

    fn on_stop(&mut self, id: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.executions.contains_key(id) {
            // Aggregated stop for a tool we never saw start: register it
            // so the block triple still reaches the client in order.
            warn!(tool_use_id = %id, "stop for unregistered tool use, registering late");
            let index = self.allocate_block_index();
            self.executions
                .insert(id.to_string(), ToolExecution::new(id.to_string(), String::new(), index));
            self.order.push(id.to_string());
        }
        if !self.executions[id].announced {
            events.extend(self.announce(id));
        }

        let exec = self.executions.get_mut(id).expect("registered above");
        exec.status = ExecutionStatus::Completed;
        exec.ended_at = Some(Utc::now());
        events.push(SseEvent::content_block_stop(exec.block_index));

        if !self.executions.values().any(ToolExecution::is_open) && !self.stop_delta_emitted {
            self.stop_delta_emitted = true;
            events.push(SseEvent::message_delta("tool_use", 0));
        }
        events
    }

    /// Upstream reported a tool failure mid-stream. Fails every open
    /// execution, newest first.
    pub fn on_tool_error(&mut self, message: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let open: Vec<String> = self
            .order
            .iter()
            .rev()
            .filter(|id| self.executions[*id].is_open())
            .cloned()
            .collect();

        for id in open {
            if !self.executions[&id].announced {
                events.extend(self.announce(&id));
            }
            let exec = self.executions.get_mut(&id).expect("open id");
            exec.status = ExecutionStatus::Error;
            exec.ended_at = Some(Utc::now());
            exec.error = Some(message.to_string());
            events.push(SseEvent::tool_error(message, &exec.id));
            events.push(SseEvent::content_block_stop(exec.block_index));
        }

        if !events.is_empty() && !self.stop_delta_emitted {
            self.stop_delta_emitted = true;
            events.push(SseEvent::message_delta("tool_error", 0));
        }
        events
    }

    /// Announce any held-back starts. The emitter calls this before
    /// interleaving text and at EOF.
    pub fn flush_pending(&mut self) -> Vec<SseEvent> {
        let pending: Vec<String> = self
            .order
            .iter()
            .filter(|id| !self.executions[*id].announced)
            .cloned()
            .collect();
        pending.iter().flat_map(|id| self.announce(id)).collect()
    }

    /// Close every announced-but-open block. Used by the emitter when
    /// the upstream hangs up without stop events.
    pub fn drain_open_blocks(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let open: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                let e = &self.executions[*id];
                e.announced && e.is_open()
            })
            .cloned()
            .collect();
        for id in open {
            let exec = self.executions.get_mut(&id).expect("open id");
            exec.status = ExecutionStatus::Completed;
            exec.ended_at = Some(Utc::now());
            events.push(SseEvent::content_block_stop(exec.block_index));
        }
        events
    }

    /// Emit intro (first tool only) + content_block_start (+ one delta
    /// for any arguments that accumulated while pending).
    fn announce(&mut self, id: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();

        if !self.text_intro_emitted {
            self.text_intro_emitted = true;
            let exec = &self.executions[id];
            let intro = intro_text(&exec.name, &exec.arguments);
            events.push(SseEvent::content_block_start(0, json!({"type": "text", "text": ""})));
            events.push(SseEvent::text_delta(0, &intro));
            events.push(SseEvent::content_block_stop(0));
        }

        let exec = self.executions.get_mut(id).expect("announce of known id");
        exec.announced = true;
        exec.status = ExecutionStatus::Running;
        validate_arguments(&exec.name, &exec.arguments);

        events.push(SseEvent::content_block_start(
            exec.block_index,
            json!({
                "type": "tool_use",
                "id": exec.id,
                "name": exec.name,
                "input": {},
            }),
        ));
        if !exec.arguments_json.is_empty() {
            events.push(SseEvent::input_json_delta(exec.block_index, &exec.arguments_json));
        }
        events
    }
}

/// Short leading utterance derived from the tool being called.
fn intro_text(name: &str, arguments: &Value) -> String {
    if name.contains("weather") {
        if let Some(city) = arguments.get("city").and_then(Value::as_str) {
            return format!("好的，让我为您查询{city}的天气情况。");
        }
    }
    format!("好的，让我使用{name}工具来帮助您。")
}

fn validate_arguments(name: &str, arguments: &Value) {
    let Some((_, required)) = REQUIRED_ARGS.iter().find(|(tool, _)| *tool == name) else {
        return;
    };
    for arg in *required {
        if arguments.get(arg).is_none() {
            warn!(tool = %name, argument = %arg, "tool call is missing a required argument");
        }
    }
}
