//! Builds a `Provider` trait object from a static `ProviderConfig`. One
//! entry per configured gateway; the generic `OpenAICompatible` variant is
//! reused by the ~11 structurally-identical providers named in the
//! deployment config.

use std::sync::Arc;

use gateway_provider_core::{Provider, ProviderConfig};

use crate::providers::deepinfra::DeepInfraProvider;
use crate::providers::huggingface::HuggingFaceProvider;
use crate::providers::openai_compatible::OpenAICompatibleProvider;
use crate::providers::openrouter::OpenRouterProvider;
use crate::providers::portkey::PortkeyProvider;
use crate::providers::static_catalog::StaticCatalogProvider;
use crate::providers::vertex::VertexProvider;

/// `name` must be `'static`: it is the registry key and every adapter's
/// `Provider::name()` return value, so it's sourced from a fixed deployment
/// config list (e.g. a `&'static [(&'static str, ProviderConfig)]`), never
/// from user input.
pub fn build_provider(name: &'static str, config: &ProviderConfig) -> Arc<dyn Provider> {
    match config {
        ProviderConfig::OpenRouter(cfg) => Arc::new(OpenRouterProvider::new(cfg.base_url.clone())),
        ProviderConfig::Portkey(cfg) => Arc::new(PortkeyProvider::new(cfg.base_url.clone())),
        ProviderConfig::Vertex(cfg) => Arc::new(VertexProvider::new(
            cfg.base_url.clone(),
            cfg.location.clone(),
            cfg.token_uri.clone(),
        )),
        ProviderConfig::DeepInfra(cfg) => Arc::new(DeepInfraProvider::new(
            cfg.base_url.clone(),
            cfg.upstream_provider_hint.clone(),
        )),
        ProviderConfig::HuggingFace(cfg) => Arc::new(HuggingFaceProvider::new(
            cfg.base_url.clone(),
            cfg.fetch_sorts.clone(),
        )),
        ProviderConfig::FalAi(cfg) => Arc::new(StaticCatalogProvider::new(
            "fal_ai",
            cfg.base_url.clone(),
            cfg.model_table.clone(),
        )),
        ProviderConfig::Chutes(cfg) => Arc::new(StaticCatalogProvider::new(
            "chutes",
            cfg.base_url.clone(),
            cfg.model_table.clone(),
        )),
        ProviderConfig::OpenAICompatible(cfg) => Arc::new(OpenAICompatibleProvider::new(
            name,
            cfg.base_url.clone(),
            cfg.auth_header_name.clone(),
            cfg.auth_header_prefix.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_provider_core::OpenRouterConfig;

    #[test]
    fn builds_openrouter_provider_with_matching_name() {
        let config = ProviderConfig::OpenRouter(OpenRouterConfig {
            base_url: "https://openrouter.ai/api/v1".to_string(),
        });
        let provider = build_provider("openrouter", &config);
        assert_eq!(provider.name(), "openrouter");
    }
}
