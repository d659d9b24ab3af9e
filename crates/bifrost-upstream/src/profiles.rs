//! HTTP client profiles. Three pooled clients with different patience:
//! short non-stream calls, long non-stream calls, and streaming. All
//! share HTTP/2 negotiation, TLS 1.2+, and generous idle pools so the
//! proxy isn't paying DNS/TLS setup per request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bifrost_core::config::TimeoutConfig;
use bifrost_core::types::{ContentBlock, MessageContent, MessagesRequest};

/// Complexity thresholds: any one of these makes a request "complex"
/// and routes it to the long profile.
const COMPLEX_MESSAGE_COUNT: usize = 8;
const COMPLEX_TOOL_COUNT: usize = 4;
const COMPLEX_TEXT_BYTES: usize = 40 * 1024;

const RESPONSE_HEADER_TIMEOUT_SIMPLE: Duration = Duration::from_secs(60);
const RESPONSE_HEADER_TIMEOUT_LONG: Duration = Duration::from_secs(5 * 60);
const RESPONSE_HEADER_TIMEOUT_STREAM: Duration = Duration::from_secs(10 * 60);

const IDLE_PER_HOST: usize = 200;
const IDLE_PER_HOST_STREAMING: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Simple,
    Long,
    Streaming,
}

impl ProfileKind {
    pub fn name(self) -> &'static str {
        match self {
            ProfileKind::Simple => "simple",
            ProfileKind::Long => "long",
            ProfileKind::Streaming => "streaming",
        }
    }
}

pub struct ClientProfiles {
    simple: reqwest::Client,
    long: reqwest::Client,
    streaming: reqwest::Client,
    pub metrics: ProfileMetrics,
}

impl ClientProfiles {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        Self {
            simple: build_client(
                Duration::from_secs(timeouts.simple_request_minutes * 60),
                RESPONSE_HEADER_TIMEOUT_SIMPLE,
                IDLE_PER_HOST,
            ),
            long: build_client(
                Duration::from_secs(timeouts.request_minutes * 60),
                RESPONSE_HEADER_TIMEOUT_LONG,
                IDLE_PER_HOST,
            ),
            streaming: build_client(
                Duration::from_secs(timeouts.stream_request_minutes * 60),
                RESPONSE_HEADER_TIMEOUT_STREAM,
                IDLE_PER_HOST_STREAMING,
            ),
            metrics: ProfileMetrics::default(),
        }
    }

    /// The simple profile directly; auth and quota calls live here.
    pub fn simple(&self) -> &reqwest::Client {
        &self.simple
    }

    /// Pick a client for a request: streaming always gets the patient
    /// profile; non-streaming picks by complexity.
    pub fn select(&self, req: &MessagesRequest) -> (&reqwest::Client, ProfileKind) {
        if req.stream {
            return (&self.streaming, ProfileKind::Streaming);
        }
        if is_complex(req) {
            (&self.long, ProfileKind::Long)
        } else {
            (&self.simple, ProfileKind::Simple)
        }
    }
}

fn build_client(total: Duration, response_header: Duration, idle_per_host: usize) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(total)
        .connect_timeout(Duration::from_secs(30))
        .read_timeout(response_header)
        .pool_max_idle_per_host(idle_per_host)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}

/// A request is complex when any of: long conversation, any image,
/// a broad tool catalog, or a large combined text payload.
pub fn is_complex(req: &MessagesRequest) -> bool {
    if req.messages.len() >= COMPLEX_MESSAGE_COUNT || req.tools.len() >= COMPLEX_TOOL_COUNT {
        return true;
    }
    let mut text_bytes = 0;
    for message in &req.messages {
        match &message.content {
            MessageContent::Text(text) => text_bytes += text.len(),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Image { .. } => return true,
                        ContentBlock::Text { text } => text_bytes += text.len(),
                        _ => {}
                    }
                }
            }
        }
    }
    text_bytes >= COMPLEX_TEXT_BYTES
}

/// Per-profile request counters, all atomic. Latencies in millis.
#[derive(Debug, Default)]
pub struct ProfileMetrics {
    simple: ProfileCounters,
    long: ProfileCounters,
    streaming: ProfileCounters,
}

#[derive(Debug)]
struct ProfileCounters {
    requests: AtomicU64,
    successes: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_min_ms: AtomicU64,
    latency_max_ms: AtomicU64,
}

impl Default for ProfileCounters {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            latency_total_ms: AtomicU64::new(0),
            latency_min_ms: AtomicU64::new(u64::MAX),
            latency_max_ms: AtomicU64::new(0),
        }
    }
}

/// Readable snapshot of one profile's counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ProfileStats {
    pub requests: u64,
    pub successes: u64,
    pub latency_total_ms: u64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
}

impl ProfileMetrics {
    fn counters(&self, kind: ProfileKind) -> &ProfileCounters {
        match kind {
            ProfileKind::Simple => &self.simple,
            ProfileKind::Long => &self.long,
            ProfileKind::Streaming => &self.streaming,
        }
    }

    pub fn record(&self, kind: ProfileKind, succeeded: bool, latency: Duration) {
        let c = self.counters(kind);
        let ms = latency.as_millis() as u64;
        c.requests.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            c.successes.fetch_add(1, Ordering::Relaxed);
        }
        c.latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        c.latency_min_ms.fetch_min(ms, Ordering::Relaxed);
        c.latency_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn stats(&self, kind: ProfileKind) -> ProfileStats {
        let c = self.counters(kind);
        let requests = c.requests.load(Ordering::Relaxed);
        ProfileStats {
            requests,
            successes: c.successes.load(Ordering::Relaxed),
            latency_total_ms: c.latency_total_ms.load(Ordering::Relaxed),
            latency_min_ms: if requests == 0 {
                0
            } else {
                c.latency_min_ms.load(Ordering::Relaxed)
            },
            latency_max_ms: c.latency_max_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_core::types::{ImageSource, Message, Role};

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "m".into(),
            max_tokens: 16,
            system: None,
            messages,
            tools: Vec::new(),
            stream: false,
            temperature: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }

    fn user(text: &str) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    #[test]
    fn short_chat_is_simple() {
        assert!(!is_complex(&request(vec![user("hi")])));
    }

    #[test]
    fn many_messages_are_complex() {
        let messages = (0..8).map(|_| user("turn")).collect();
        assert!(is_complex(&request(messages)));
    }

    #[test]
    fn images_are_complex() {
        let msg = Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::Image {
                source: ImageSource::base64("image/png", "eA=="),
            }]),
        };
        assert!(is_complex(&request(vec![msg])));
    }

    #[test]
    fn bulk_text_is_complex() {
        let big = "x".repeat(COMPLEX_TEXT_BYTES);
        assert!(is_complex(&request(vec![user(&big)])));
    }

    #[test]
    fn wide_tool_catalog_is_complex() {
        let mut req = request(vec![user("hi")]);
        req.tools = (0..4)
            .map(|i| bifrost_core::types::ToolDefinition {
                name: format!("t{i}"),
                description: String::new(),
                input_schema: serde_json::json!({}),
            })
            .collect();
        assert!(is_complex(&req));
    }

    #[test]
    fn metrics_track_min_max_total() {
        let metrics = ProfileMetrics::default();
        metrics.record(ProfileKind::Simple, true, Duration::from_millis(120));
        metrics.record(ProfileKind::Simple, false, Duration::from_millis(40));
        metrics.record(ProfileKind::Simple, true, Duration::from_millis(300));

        let stats = metrics.stats(ProfileKind::Simple);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.latency_min_ms, 40);
        assert_eq!(stats.latency_max_ms, 300);
        assert_eq!(stats.latency_total_ms, 460);

        // untouched profiles read zero
        let idle = metrics.stats(ProfileKind::Streaming);
        assert_eq!(idle.requests, 0);
        assert_eq!(idle.latency_min_ms, 0);
    }
}
