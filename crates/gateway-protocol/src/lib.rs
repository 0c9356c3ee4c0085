//! Wire schema for the gateway's OpenAI-compatible HTTP surface, plus a
//! small generic SSE encoder/decoder shared by every streaming adapter.

pub mod openai;
pub mod sse;
