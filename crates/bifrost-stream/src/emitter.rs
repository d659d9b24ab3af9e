//! The per-request streaming pipeline: upstream bytes in, ordered
//! Anthropic SSE events out.
//!
//! One emitter serves one request on one task, so there is no locking
//! here. It owns the frame decoder's scratch buffer, the tool
//! lifecycle manager, and the usage accumulator, and it guarantees the
//! client-visible grammar: `message_start (block triple)* message_delta
//! message_stop`, with `message_stop` emitted exactly once, by us.

use serde_json::json;
use tracing::{debug, warn};

use bifrost_codec::{event::parse_events, FrameDecoder, ParsedEvent};
use bifrost_core::types::{ContentBlock, MessagesResponse, Role, Usage};

use crate::lifecycle::ToolLifecycle;
use crate::sse::SseEvent;

pub struct StreamEmitter {
    message_id: String,
    model: String,
    decoder: FrameDecoder,
    lifecycle: ToolLifecycle,
    usage: Usage,
    /// All assistant text seen, for the non-streaming fold.
    text: String,
    /// Index of the currently open text block, if any.
    open_text_index: Option<u32>,
    stop_reason: Option<String>,
    /// Fatal upstream error, recorded so the fold can surface it.
    error: Option<(String, String)>,
    finished: bool,
}

impl StreamEmitter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            decoder: FrameDecoder::new(),
            lifecycle: ToolLifecycle::new(),
            usage: Usage::default(),
            text: String::new(),
            open_text_index: None,
            stop_reason: None,
            error: None,
            finished: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn error(&self) -> Option<&(String, String)> {
        self.error.as_ref()
    }

    /// Opening events: message_start (with the local input estimate,
    /// since the upstream only reports usage at the end) and a ping.
    pub fn start_events(&mut self, input_token_estimate: u32) -> Vec<SseEvent> {
        self.usage.input_tokens = input_token_estimate;
        vec![
            SseEvent::message_start(&self.message_id, &self.model, input_token_estimate),
            SseEvent::ping(),
        ]
    }

    /// Feed one chunk of upstream bytes. Corrupt or malformed frames
    /// are logged and dropped; the stream carries on.
    pub fn on_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for framed in self.decoder.decode(chunk) {
            match framed {
                Ok(frame) => {
                    for event in parse_events(&frame) {
                        out.extend(self.on_parsed(&event));
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }
        out
    }

    /// Feed one already-parsed upstream event.
    pub fn on_parsed(&mut self, event: &ParsedEvent) -> Vec<SseEvent> {
        match event {
            ParsedEvent::AssistantText { content } => self.on_text(content),

            ParsedEvent::ToolUseStart { .. }
            | ParsedEvent::ToolUseInputDelta { .. }
            | ParsedEvent::ToolUseStop { .. } => {
                let mut out = self.close_text_block();
                out.extend(self.lifecycle.on_event(event));
                out
            }

            ParsedEvent::Usage { input, output } => {
                debug!(input, output, "upstream usage");
                if *input > 0 {
                    self.usage.input_tokens = *input;
                }
                self.usage.output_tokens = *output;
                Vec::new()
            }

            ParsedEvent::MessageStop { reason } => {
                self.stop_reason = Some(reason.clone());
                Vec::new()
            }

            ParsedEvent::Error { kind, message } => {
                if self.lifecycle.has_executions() && !self.lifecycle.stop_delta_emitted() {
                    self.stop_reason = Some("tool_error".to_string());
                    let mut out = self.close_text_block();
                    out.extend(self.lifecycle.on_tool_error(message));
                    out
                } else {
                    self.error = Some((kind.clone(), message.clone()));
                    vec![SseEvent::error(kind, message)]
                }
            }
        }
    }

    fn on_text(&mut self, content: &str) -> Vec<SseEvent> {
        let mut out = self.lifecycle.flush_pending();
        let index = match self.open_text_index {
            Some(index) => index,
            None => {
                // first text block takes index 0 if nothing claimed it
                let index = if self.lifecycle.text_intro_emitted() {
                    self.lifecycle.allocate_block_index()
                } else {
                    self.lifecycle.mark_text_emitted();
                    0
                };
                self.open_text_index = Some(index);
                out.push(SseEvent::content_block_start(
                    index,
                    json!({"type": "text", "text": ""}),
                ));
                index
            }
        };
        self.text.push_str(content);
        out.push(SseEvent::text_delta(index, content));
        out
    }

    fn close_text_block(&mut self) -> Vec<SseEvent> {
        match self.open_text_index.take() {
            Some(index) => vec![SseEvent::content_block_stop(index)],
            None => Vec::new(),
        }
    }

    fn resolved_stop_reason(&self) -> String {
        if let Some(reason) = &self.stop_reason {
            return reason.clone();
        }
        if self.lifecycle.has_executions() {
            "tool_use".to_string()
        } else {
            "end_turn".to_string()
        }
    }

    /// Upstream EOF: drain open blocks, emit the final message_delta
    /// unless the lifecycle already did, then message_stop.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut out = self.lifecycle.flush_pending();
        out.extend(self.close_text_block());
        out.extend(self.lifecycle.drain_open_blocks());

        if !self.lifecycle.stop_delta_emitted() {
            out.push(SseEvent::message_delta(
                &self.resolved_stop_reason(),
                self.usage.output_tokens,
            ));
        }
        out.push(SseEvent::message_stop());
        out
    }

    /// Fold everything seen into a complete non-streaming response.
    pub fn into_response(mut self) -> MessagesResponse {
        let stop_reason = self.resolved_stop_reason();
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text {
                text: std::mem::take(&mut self.text),
            });
        }
        for block in self.lifecycle.tool_use_blocks() {
            match serde_json::from_value::<ContentBlock>(block) {
                Ok(parsed) => content.push(parsed),
                Err(e) => warn!(error = %e, "skipping unfoldable tool_use block"),
            }
        }

        MessagesResponse {
            id: self.message_id,
            response_type: "message".to_string(),
            role: Role::Assistant,
            model: self.model,
            content,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: self.usage,
        }
    }
}
