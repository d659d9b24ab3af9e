//! Shared request plumbing: acquire a credential, open the upstream
//! call, and either buffer the event stream into a folded response or
//! re-emit it as Anthropic SSE.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};

use bifrost_core::error::BifrostError;
use bifrost_core::types::MessagesRequest;
use bifrost_pool::Lease;
use bifrost_stream::StreamEmitter;
use bifrost_translate::UpstreamPayloadBuilder;

use crate::app::{ApiError, AppState};

/// Acquire a credential and open the upstream generate call. On
/// upstream failure the lease is released as failed; the caller never
/// sees a lease it has to clean up.
pub async fn open_upstream(
    state: &Arc<AppState>,
    req: &MessagesRequest,
) -> Result<(Lease, reqwest::Response), ApiError> {
    if req.messages.is_empty() {
        return Err(BifrostError::InvalidRequest("messages must not be empty".to_string()).into());
    }

    let lease = state.pool.acquire().await?;
    info!(credential = %lease.credential_id, model = %req.model, "credential leased");

    let mut builder = UpstreamPayloadBuilder::new(&state.upstream.endpoints().profile_arn);
    let payload = match builder.build(req) {
        Ok(payload) => payload,
        Err(e) => {
            // request-shape problem, not the credential's fault
            state.pool.release(&lease.credential_id, true).await;
            return Err(e.into());
        }
    };

    match state
        .upstream
        .generate(req, &payload, &lease.access_token)
        .await
    {
        Ok(response) => Ok((lease, response)),
        Err(e) => {
            state.pool.release(&lease.credential_id, false).await;
            Err(e.into())
        }
    }
}

/// Buffer the whole upstream stream through an emitter. Returns the
/// emitter ready for `into_response()`.
pub async fn collect(
    state: Arc<AppState>,
    req: &MessagesRequest,
    lease: Lease,
    response: reqwest::Response,
    input_estimate: u32,
) -> Result<StreamEmitter, ApiError> {
    let mut emitter = StreamEmitter::new(&req.model);
    emitter.start_events(input_estimate);

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                emitter.on_bytes(&bytes);
                if let Some((kind, message)) = emitter.error().cloned() {
                    state.pool.release(&lease.credential_id, false).await;
                    return Err(BifrostError::UpstreamError {
                        status: 502,
                        message: format!("{kind}: {message}"),
                    }
                    .into());
                }
            }
            Err(e) => {
                state.pool.release(&lease.credential_id, false).await;
                return Err(BifrostError::UpstreamUnavailable(e.to_string()).into());
            }
        }
    }

    emitter.finish();
    state.pool.release(&lease.credential_id, true).await;
    Ok(emitter)
}

/// Stream the upstream response as Anthropic SSE. Errors after the
/// first flushed byte become an SSE `error` event; the connection then
/// closes.
pub fn anthropic_sse(
    state: Arc<AppState>,
    req: MessagesRequest,
    lease: Lease,
    response: reqwest::Response,
    input_estimate: u32,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut emitter = StreamEmitter::new(&req.model);
        for ev in emitter.start_events(input_estimate) {
            yield Ok(to_axum_event(&ev));
        }

        let mut failed = false;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for ev in emitter.on_bytes(&bytes) {
                        yield Ok(to_axum_event(&ev));
                    }
                    if emitter.error().is_some() {
                        failed = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream read failed mid-flight");
                    let ev = bifrost_stream::SseEvent::error("upstream_unavailable", &e.to_string());
                    yield Ok(to_axum_event(&ev));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            for ev in emitter.finish() {
                yield Ok(to_axum_event(&ev));
            }
        }
        state.pool.release(&lease.credential_id, !failed).await;
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn to_axum_event(ev: &bifrost_stream::SseEvent) -> Event {
    Event::default().event(ev.event).data(ev.data.to_string())
}
