use serde::{Deserialize, Serialize};

use super::ModelTable;

/// Static, per-gateway configuration (distinct from the runtime `Credential`
/// a request actually authenticates with). One variant per bespoke adapter,
/// plus a single data-driven variant reused for every provider whose wire
/// protocol is already OpenAI-chat-compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "settings", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenRouter(OpenRouterConfig),
    Portkey(PortkeyConfig),
    Vertex(VertexConfig),
    DeepInfra(DeepInfraConfig),
    HuggingFace(HuggingFaceConfig),
    FalAi(StaticCatalogConfig),
    Chutes(StaticCatalogConfig),
    OpenAICompatible(OpenAICompatibleConfig),
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        match self {
            ProviderConfig::OpenRouter(c) => &c.base_url,
            ProviderConfig::Portkey(c) => &c.base_url,
            ProviderConfig::Vertex(c) => &c.base_url,
            ProviderConfig::DeepInfra(c) => &c.base_url,
            ProviderConfig::HuggingFace(c) => &c.base_url,
            ProviderConfig::FalAi(c) => &c.base_url,
            ProviderConfig::Chutes(c) => &c.base_url,
            ProviderConfig::OpenAICompatible(c) => &c.base_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

/// Portkey fronts many sub-providers under `@<sub>/...` model prefixes; see
/// `gateway-catalog`'s merge rule for the aggregator-vs-direct id precedence
/// this implies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortkeyConfig {
    #[serde(default = "default_portkey_base_url")]
    pub base_url: String,
    /// Sub-provider slugs this gateway aggregates, e.g. `["deepinfra", "groq"]`.
    #[serde(default)]
    pub sub_providers: Vec<String>,
}

fn default_portkey_base_url() -> String {
    "https://api.portkey.ai/v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    #[serde(default = "default_vertex_base_url")]
    pub base_url: String,
    pub location: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_vertex_base_url() -> String {
    "https://{location}-aiplatform.googleapis.com/v1".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// DeepInfra requires the `upstream_provider="deepinfra"` hint documented
/// alongside the canonical request translation rules; omitting it is the
/// documented cause of observed 502s from the aggregator it's routed through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepInfraConfig {
    #[serde(default = "default_deepinfra_base_url")]
    pub base_url: String,
    #[serde(default = "default_upstream_provider_hint")]
    pub upstream_provider_hint: String,
}

fn default_deepinfra_base_url() -> String {
    "https://api.deepinfra.com/v1/openai".to_string()
}

fn default_upstream_provider_hint() -> String {
    "deepinfra".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuggingFaceConfig {
    #[serde(default = "default_huggingface_base_url")]
    pub base_url: String,
    /// Catalog fetch sorts to harvest and merge (e.g. `likes`, `downloads`,
    /// `trending`); multiple sorts are unioned by model id.
    #[serde(default = "default_huggingface_sorts")]
    pub fetch_sorts: Vec<String>,
}

fn default_huggingface_base_url() -> String {
    "https://api-inference.huggingface.co/v1".to_string()
}

fn default_huggingface_sorts() -> Vec<String> {
    vec!["likes".to_string(), "downloads".to_string()]
}

/// Fal.ai and Chutes ship a fixed, hand-curated catalog rather than a
/// fetchable listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticCatalogConfig {
    pub base_url: String,
    pub model_table: ModelTable,
}

/// One configurable adapter reused for every provider whose wire protocol is
/// already OpenAI-chat-compatible (Fireworks, Together, Groq, Cerebras, xAI,
/// Novita, Nebius, Vercel AI Gateway, Featherless, Near, AIMO).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAICompatibleConfig {
    pub id: String,
    pub base_url: String,
    #[serde(default = "default_auth_header_name")]
    pub auth_header_name: String,
    #[serde(default = "default_auth_header_prefix")]
    pub auth_header_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_table: Option<ModelTable>,
}

fn default_auth_header_name() -> String {
    "authorization".to_string()
}

fn default_auth_header_prefix() -> String {
    "Bearer ".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_compatible_config_defaults_to_bearer_auth() {
        let json = serde_json::json!({
            "id": "fireworks",
            "base_url": "https://api.fireworks.ai/inference/v1",
        });
        let config: OpenAICompatibleConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.auth_header_name, "authorization");
        assert_eq!(config.auth_header_prefix, "Bearer ");
    }

    #[test]
    fn provider_config_round_trips_through_tagged_json() {
        let config = ProviderConfig::DeepInfra(DeepInfraConfig {
            base_url: default_deepinfra_base_url(),
            upstream_provider_hint: default_upstream_provider_hint(),
        });
        let json = serde_json::to_string(&config).unwrap();
        let back: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.base_url(), "https://api.deepinfra.com/v1/openai");
    }
}
