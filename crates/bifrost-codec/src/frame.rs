//! Streaming decoder for the upstream binary event-stream protocol.
//!
//! Frame layout:
//!
//! ```text
//! [total_len:4][headers_len:4][headers...][payload...][crc32:4]
//! ```
//!
//! Both length words are big-endian. `total_len` covers the prelude,
//! the header table, and the payload; the CRC32 trails it and is
//! computed over `frame[0..total_len]`. Headers use the tight binary
//! table `[name_len:1][name][type:1][value_len:2][value]` where type 7
//! is a UTF-8 string (the only type the upstream emits).
//!
//! The decoder is streaming-safe: feed it arbitrary chunk boundaries
//! and it buffers the unconsumed tail between calls. A corrupt frame is
//! dropped and decoding resynchronizes at the next plausible length
//! prefix. No I/O happens here.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

/// Largest total_len the decoder will believe. Anything bigger is
/// treated as garbage and skipped during resynchronization.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Prelude (8) plus trailing CRC (4).
const FRAME_OVERHEAD: usize = 12;

/// String-typed header value, per the upstream header table.
const HEADER_TYPE_STRING: u8 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("corrupt frame: crc mismatch (declared {declared:#010x}, computed {computed:#010x})")]
    Corrupt { declared: u32, computed: u32 },
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn event_type(&self) -> Option<&str> {
        self.headers.get(":event-type").map(String::as_str)
    }

    pub fn exception_type(&self) -> Option<&str> {
        self.headers.get(":exception-type").map(String::as_str)
    }

    /// Payload as JSON when it plausibly is JSON. The upstream prefixes
    /// JSON bodies with a literal `event` marker and pads with NULs;
    /// both are stripped before parsing. Non-JSON payloads stay opaque.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        let content_type = self.headers.get(":content-type").map(String::as_str);
        let mut body = self.payload.as_slice();
        if let Some(rest) = body.strip_prefix(b"event") {
            body = rest;
        }
        while body.last() == Some(&0) {
            body = &body[..body.len() - 1];
        }
        let looks_json = body.first() == Some(&b'{') || body.first() == Some(&b'[');
        if content_type != Some("application/json") && !looks_json {
            return None;
        }
        serde_json::from_slice(body).ok()
    }
}

/// Incremental frame decoder. Owns the partial-read buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and decode every complete frame it unlocks.
    /// Errors are returned in-sequence; decoding continues past them.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<Frame, FrameError>> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match self.try_frame() {
                Step::Frame(frame, consumed) => {
                    self.buf.drain(..consumed);
                    out.push(Ok(frame));
                }
                Step::Error(err, skip) => {
                    debug!(error = %err, skipped = skip, "dropping frame");
                    self.buf.drain(..skip);
                    self.resync();
                    out.push(Err(err));
                }
                Step::NeedMore => break,
            }
        }
        out
    }

    fn try_frame(&self) -> Step {
        let buf = &self.buf;
        if buf.len() < 8 {
            return Step::NeedMore;
        }

        let total_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let header_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

        if total_len > MAX_FRAME_LEN || total_len < FRAME_OVERHEAD {
            return Step::Error(
                FrameError::Malformed(format!("implausible total length {total_len}")),
                1,
            );
        }
        if header_len > total_len - FRAME_OVERHEAD {
            return Step::Error(
                FrameError::Malformed(format!(
                    "header length {header_len} exceeds frame length {total_len}"
                )),
                1,
            );
        }

        // The CRC trails the declared length.
        let frame_end = total_len + 4;
        if buf.len() < frame_end {
            return Step::NeedMore;
        }

        let declared = u32::from_be_bytes([
            buf[total_len],
            buf[total_len + 1],
            buf[total_len + 2],
            buf[total_len + 3],
        ]);
        let computed = crc32fast::hash(&buf[..total_len]);
        if declared != computed {
            // Lengths were self-consistent, so the frame boundary is
            // trustworthy: skip the whole frame, not just one byte.
            return Step::Error(FrameError::Corrupt { declared, computed }, frame_end);
        }

        let headers = parse_headers(&buf[8..8 + header_len]);
        let payload = buf[8 + header_len..total_len].to_vec();
        Step::Frame(Frame { headers, payload }, frame_end)
    }

    /// After a dropped frame, scan forward to the next offset whose
    /// first four bytes read as a plausible big-endian length prefix.
    fn resync(&mut self) {
        let mut offset = 0;
        while self.buf.len() - offset >= 4 {
            let candidate = u32::from_be_bytes([
                self.buf[offset],
                self.buf[offset + 1],
                self.buf[offset + 2],
                self.buf[offset + 3],
            ]) as usize;
            if (FRAME_OVERHEAD..=MAX_FRAME_LEN).contains(&candidate) {
                break;
            }
            offset += 1;
        }
        self.buf.drain(..offset);
    }
}

enum Step {
    Frame(Frame, usize),
    Error(FrameError, usize),
    NeedMore,
}

/// Parse the binary header table. Unknown value types end the scan --
/// their length is unknowable, and the upstream only sends strings.
fn parse_headers(mut buf: &[u8]) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    while !buf.is_empty() {
        let name_len = buf[0] as usize;
        buf = &buf[1..];
        if name_len == 0 || buf.len() < name_len {
            break;
        }
        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        buf = &buf[name_len..];

        let Some((&value_type, rest)) = buf.split_first() else {
            break;
        };
        buf = rest;
        if value_type != HEADER_TYPE_STRING {
            break;
        }
        if buf.len() < 2 {
            break;
        }
        let value_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        buf = &buf[2..];
        if buf.len() < value_len {
            break;
        }
        let value = String::from_utf8_lossy(&buf[..value_len]).into_owned();
        buf = &buf[value_len..];
        headers.insert(name, value);
    }
    headers
}

/// Test/bench helper: build an encoded frame around the given headers
/// and payload, with a correct trailing CRC.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_buf = Vec::new();
    for (name, value) in headers {
        header_buf.push(name.len() as u8);
        header_buf.extend_from_slice(name.as_bytes());
        header_buf.push(HEADER_TYPE_STRING);
        header_buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_buf.extend_from_slice(value.as_bytes());
    }

    let total_len = 8 + header_buf.len() + payload.len();
    let mut frame = Vec::with_capacity(total_len + 4);
    frame.extend_from_slice(&(total_len as u32).to_be_bytes());
    frame.extend_from_slice(&(header_buf.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header_buf);
    frame.extend_from_slice(payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}
