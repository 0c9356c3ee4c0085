//! Minimal wire shape for `POST /v1/responses`. Runs through the same
//! gate/router/accounting pipeline as chat completions; the gateway does not
//! attempt the full Responses API surface (tool-use turns, file search, ...),
//! only the single-turn text-in/text-out shape a caller migrating off
//! `/v1/chat/completions` needs.

use serde::{Deserialize, Serialize};

use super::chat::Usage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponseRequest {
    pub model: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub status: String,
    pub output_text: String,
    pub usage: Usage,
}
