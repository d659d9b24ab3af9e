//! POST /v1/chat/completions — the OpenAI-compatible surface. Lets
//! Cursor, Continue, and anything else that speaks the OpenAI API ride
//! the same upstream pipeline. Internally every request is normalized
//! to the Anthropic shape; this module translates on the way in and
//! the way out.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use bifrost_core::types::MessagesRequest;
use bifrost_pool::Lease;
use bifrost_stream::{SseEvent, StreamEmitter};
use bifrost_translate::openai::{self, ChatCompletionsRequest};

use crate::app::{ApiError, AppState};
use crate::http::relay;

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionsRequest>,
) -> Result<Response, ApiError> {
    info!(model = %req.model, stream = req.stream, "chat completions request");

    let streaming = req.stream;
    let anthropic_req = req.into_messages_request()?;
    let input_estimate = bifrost_tokens::estimate_request(&anthropic_req);
    let (lease, response) = relay::open_upstream(&state, &anthropic_req).await?;

    if streaming {
        Ok(openai_sse(state, anthropic_req, lease, response, input_estimate).into_response())
    } else {
        let emitter = relay::collect(state, &anthropic_req, lease, response, input_estimate).await?;
        let folded = emitter.into_response();
        Ok(Json(openai::to_chat_completions(&folded)).into_response())
    }
}

/// Stream the pipeline's Anthropic events re-encoded as OpenAI
/// `chat.completion.chunk` frames, ending with the `[DONE]` sentinel.
fn openai_sse(
    state: Arc<AppState>,
    req: MessagesRequest,
    lease: Lease,
    response: reqwest::Response,
    input_estimate: u32,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let mut translator = ChunkTranslator::new(&id, &req.model);

        let mut emitter = StreamEmitter::new(&req.model);
        for ev in emitter.start_events(input_estimate) {
            for chunk in translator.translate(&ev) {
                yield Ok(chunk);
            }
        }

        let mut failed = false;
        let mut body = response.bytes_stream();
        while let Some(read) = body.next().await {
            match read {
                Ok(bytes) => {
                    for ev in emitter.on_bytes(&bytes) {
                        for chunk in translator.translate(&ev) {
                            yield Ok(chunk);
                        }
                    }
                    if emitter.error().is_some() {
                        failed = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream read failed mid-flight");
                    yield Ok(Event::default()
                        .data(json!({"error": {"type": "upstream_unavailable", "message": e.to_string()}}).to_string()));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            for ev in emitter.finish() {
                for chunk in translator.translate(&ev) {
                    yield Ok(chunk);
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
        state.pool.release(&lease.credential_id, !failed).await;
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Re-encodes the internal Anthropic event stream as OpenAI chunks.
/// Tracks which content-block index maps to which tool_calls slot.
struct ChunkTranslator {
    id: String,
    model: String,
    tool_slots: HashMap<u64, usize>,
}

impl ChunkTranslator {
    fn new(id: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            tool_slots: HashMap::new(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Event {
        let body = openai::chunk(&self.id, &self.model, delta, finish_reason);
        Event::default().data(body.to_string())
    }

    fn translate(&mut self, ev: &SseEvent) -> Vec<Event> {
        match ev.event {
            // prime the assistant role on stream open
            "message_start" => {
                vec![self.chunk(json!({"role": "assistant", "content": ""}), None)]
            }

            "content_block_start" => {
                let block = &ev.data["content_block"];
                if block["type"] != "tool_use" {
                    return Vec::new();
                }
                let index = ev.data["index"].as_u64().unwrap_or_default();
                let slot = self.tool_slots.len();
                self.tool_slots.insert(index, slot);
                vec![self.chunk(
                    json!({"tool_calls": [{
                        "index": slot,
                        "id": block["id"],
                        "type": "function",
                        "function": {"name": block["name"], "arguments": ""},
                    }]}),
                    None,
                )]
            }

            "content_block_delta" => match ev.data["delta"]["type"].as_str() {
                Some("text_delta") => {
                    vec![self.chunk(json!({"content": ev.data["delta"]["text"]}), None)]
                }
                Some("input_json_delta") => {
                    let index = ev.data["index"].as_u64().unwrap_or_default();
                    let Some(&slot) = self.tool_slots.get(&index) else {
                        return Vec::new();
                    };
                    vec![self.chunk(
                        json!({"tool_calls": [{
                            "index": slot,
                            "function": {"arguments": ev.data["delta"]["partial_json"]},
                        }]}),
                        None,
                    )]
                }
                _ => Vec::new(),
            },

            "message_delta" => {
                let stop_reason = ev.data["delta"]["stop_reason"].as_str().unwrap_or("end_turn");
                vec![self.chunk(json!({}), Some(openai::map_finish_reason(stop_reason)))]
            }

            "error" => {
                vec![Event::default().data(ev.data.to_string())]
            }

            // ping, content_block_stop, message_stop have no OpenAI shape
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translator_assigns_tool_slots_in_order() {
        let mut tr = ChunkTranslator::new("chatcmpl-x", "m");
        let start0 = SseEvent::content_block_start(
            1,
            json!({"type": "tool_use", "id": "a", "name": "read", "input": {}}),
        );
        let start1 = SseEvent::content_block_start(
            2,
            json!({"type": "tool_use", "id": "b", "name": "bash", "input": {}}),
        );
        assert_eq!(tr.translate(&start0).len(), 1);
        assert_eq!(tr.translate(&start1).len(), 1);
        assert_eq!(tr.tool_slots[&1], 0);
        assert_eq!(tr.tool_slots[&2], 1);

        // deltas route to the allocated slot
        let delta = SseEvent::input_json_delta(2, "{\"command\":\"ls\"}");
        assert_eq!(tr.translate(&delta).len(), 1);

        // unknown index is dropped rather than misattributed
        let stray = SseEvent::input_json_delta(9, "{}");
        assert!(tr.translate(&stray).is_empty());
    }

    #[test]
    fn text_and_lifecycle_events_map() {
        let mut tr = ChunkTranslator::new("chatcmpl-x", "m");
        assert_eq!(tr.translate(&SseEvent::message_start("msg", "m", 1)).len(), 1);
        assert_eq!(tr.translate(&SseEvent::text_delta(0, "hi")).len(), 1);
        assert_eq!(tr.translate(&SseEvent::message_delta("tool_use", 0)).len(), 1);
        assert!(tr.translate(&SseEvent::ping()).is_empty());
        assert!(tr.translate(&SseEvent::message_stop()).is_empty());
        assert!(tr.translate(&SseEvent::content_block_stop(0)).is_empty());
    }
}
