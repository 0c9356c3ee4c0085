//! Wire shape for `GET /v1/models`, `GET /catalog/models`, and
//! `GET /v1/models/{provider}/{model}`: the normalized catalog entry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// `provider_slug/model_name`.
    pub id: String,
    pub object: String,
    pub source_gateway: String,
    pub display_name: String,
    pub context_length: Option<u32>,
    pub pricing: Pricing,
    pub modality: Modality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub huggingface: Option<HuggingFaceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_upstream: Option<serde_json::Value>,
}

/// Per-token USD prices, normalized at fetch time with a `"0"` fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt: String,
    pub completion: String,
    pub request: String,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            prompt: "0".to_string(),
            completion: "0".to_string(),
            request: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Modality {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuggingFaceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub include_huggingface: bool,
}
