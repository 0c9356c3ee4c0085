//! Server-sent-event framing for `/v1/chat/completions` streams: one `data:`
//! line per chunk, a mid-stream error encoded the same way, and the literal
//! `data: [DONE]\n\n` sentinel that always ends the stream regardless of how
//! it got there.

use bytes::Bytes;

use crate::error::{error_json, ErrorCode};

pub fn encode_event(payload: &serde_json::Value) -> Bytes {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {data}\n\n"))
}

pub fn encode_error(code: ErrorCode, message: &str) -> Bytes {
    encode_event(&error_json(code, message))
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
