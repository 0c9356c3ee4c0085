use gateway_catalog::Catalog;
use gateway_protocol::openai::models::Pricing;

use crate::error::RouterError;

/// One gateway willing to serve a resolved model, in the order the router
/// should try it. `upstream_model` is the raw name that gateway expects in
/// the outgoing request body, with the `{gateway}/` prefix already stripped.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub gateway: String,
    pub upstream_model: String,
    pub pricing: Pricing,
}

fn strip_prefix<'a>(id: &'a str, gateway: &str) -> &'a str {
    id.strip_prefix(gateway)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(id)
}

/// Builds the ordered candidate list for a requested model name.
///
/// A name of the form `{gateway}/{model}` pins that gateway first; any other
/// gateway publishing the same upstream model name under its own prefix
/// follows, in priority order, as failover. A bare name (no recognized
/// gateway prefix) is searched across every gateway's own catalog, in
/// priority order, never the merged `GetAll` view, since merging collapses
/// exactly the candidates failover needs.
pub async fn resolve_candidates(
    catalog: &Catalog,
    gateway_order: &[String],
    requested_model: &str,
    max_attempts: usize,
) -> Result<Vec<Candidate>, RouterError> {
    let pinned_gateway = requested_model
        .split_once('/')
        .map(|(prefix, _)| prefix)
        .filter(|prefix| gateway_order.iter().any(|g| g == prefix));

    let target_suffix = match pinned_gateway {
        Some(gateway) => strip_prefix(requested_model, gateway).to_string(),
        None => requested_model.to_string(),
    };

    let mut candidates = Vec::new();
    let mut order = gateway_order.to_vec();
    if let Some(gateway) = pinned_gateway {
        order.retain(|g| g != gateway);
        order.insert(0, gateway.to_string());
    }

    for gateway in &order {
        if candidates.len() >= max_attempts {
            break;
        }
        let Ok(entries) = catalog.get_models(gateway).await else {
            continue;
        };
        let found = entries.iter().find(|entry| {
            entry.id == requested_model || strip_prefix(&entry.id, gateway) == target_suffix
        });
        if let Some(entry) = found {
            candidates.push(Candidate {
                gateway: gateway.clone(),
                upstream_model: strip_prefix(&entry.id, gateway).to_string(),
                pricing: entry.pricing.clone(),
            });
        }
    }

    if candidates.is_empty() {
        return Err(RouterError::NotFound(requested_model.to_string()));
    }
    candidates.truncate(max_attempts);
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use gateway_common::CatalogConfig;
    use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
    use gateway_protocol::openai::models::{Modality, Pricing};
    use gateway_provider_core::{
        ApiKeyCredential, Credential, CredentialPool, EventHub, Provider, ProviderRegistry,
        ProviderResult, UpstreamCtx,
    };

    use super::*;

    struct FakeProvider {
        name: &'static str,
        models: Vec<ModelEntry>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn invoke(
            &self,
            _ctx: &UpstreamCtx,
            _credential: &Credential,
            _request: &ChatCompletionRequest,
        ) -> ProviderResult<ChatCompletionResponse> {
            unimplemented!("resolution tests never invoke")
        }

        async fn invoke_stream(
            &self,
            _ctx: &UpstreamCtx,
            _credential: &Credential,
            _request: &ChatCompletionRequest,
        ) -> ProviderResult<tokio::sync::mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
            unimplemented!("resolution tests never stream")
        }

        async fn list_models(&self, _credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
            Ok(self.models.clone())
        }
    }

    fn entry(gateway: &str, upstream_name: &str) -> ModelEntry {
        ModelEntry {
            id: format!("{gateway}/{upstream_name}"),
            object: "model".to_string(),
            source_gateway: gateway.to_string(),
            display_name: upstream_name.to_string(),
            context_length: None,
            pricing: Pricing::default(),
            modality: Modality::default(),
            huggingface: None,
            raw_upstream: None,
        }
    }

    async fn build_catalog(gateways: Vec<(&'static str, Vec<ModelEntry>)>, priority: Vec<String>) -> Catalog {
        let events = EventHub::new(16);
        let credentials = Arc::new(CredentialPool::new(events.clone()));
        let mut registry = ProviderRegistry::new();
        for (index, (name, models)) in gateways.into_iter().enumerate() {
            registry.register(Arc::new(FakeProvider { name, models }));
            credentials
                .insert(
                    name,
                    index as i64,
                    Credential::ApiKey(ApiKeyCredential {
                        api_key: "test-key".to_string(),
                    }),
                )
                .await;
        }
        let config = CatalogConfig {
            ttl_s: 300,
            stale_ttl_s: 3600,
            gateway_priority: priority,
        };
        Catalog::new(Arc::new(registry), credentials, events, &config)
    }

    #[test]
    fn strips_matching_gateway_prefix() {
        assert_eq!(strip_prefix("openrouter/gpt-4o", "openrouter"), "gpt-4o");
        assert_eq!(strip_prefix("gpt-4o", "openrouter"), "gpt-4o");
    }

    #[tokio::test]
    async fn bare_name_collects_candidates_from_every_gateway_in_priority_order() {
        let catalog = build_catalog(
            vec![
                ("openrouter", vec![entry("openrouter", "gpt-4o")]),
                ("groq", vec![entry("groq", "gpt-4o")]),
            ],
            vec!["openrouter".to_string(), "groq".to_string()],
        )
        .await;

        let candidates = resolve_candidates(
            &catalog,
            catalog.gateway_order(),
            "gpt-4o",
            4,
        )
        .await
        .expect("resolves");

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].gateway, "openrouter");
        assert_eq!(candidates[1].gateway, "groq");
        assert_eq!(candidates[0].upstream_model, "gpt-4o");
    }

    #[tokio::test]
    async fn gateway_prefix_pins_that_gateway_first() {
        let catalog = build_catalog(
            vec![
                ("openrouter", vec![entry("openrouter", "gpt-4o")]),
                ("groq", vec![entry("groq", "gpt-4o")]),
            ],
            vec!["openrouter".to_string(), "groq".to_string()],
        )
        .await;

        let candidates = resolve_candidates(&catalog, catalog.gateway_order(), "groq/gpt-4o", 4)
            .await
            .expect("resolves");

        assert_eq!(candidates[0].gateway, "groq");
        assert_eq!(candidates[1].gateway, "openrouter");
    }

    #[tokio::test]
    async fn unknown_model_is_reported_as_not_found() {
        let catalog = build_catalog(
            vec![("openrouter", vec![entry("openrouter", "gpt-4o")])],
            vec!["openrouter".to_string()],
        )
        .await;

        let err = resolve_candidates(&catalog, catalog.gateway_order(), "nonexistent", 4)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NotFound(_)));
    }
}
