//! OpenRouter: a bespoke adapter (not folded into the generic
//! `OpenAICompatible` family) because the router gives it first priority
//! among overlapping catalog matches (see `gateway-router`'s resolution
//! order), even though its wire protocol needs no special handling here.

use async_trait::async_trait;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{Modality, ModelEntry, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::{Credential, Provider, ProviderResult, UpstreamCtx};

use crate::chat_bridge::{self, AuthHeader};
use crate::http_client::shared_client;

const PROVIDER_NAME: &str = "openrouter";

pub struct OpenRouterProvider {
    base_url: String,
}

impl OpenRouterProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn api_key<'a>(&self, credential: &'a Credential) -> ProviderResult<&'a str> {
        match credential {
            Credential::ApiKey(cred) => Ok(cred.api_key.as_str()),
            Credential::ServiceAccount(_) => Err(wrong_credential_shape(PROVIDER_NAME)),
        }
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn invoke(
        &self,
        _ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let api_key = self.api_key(credential)?;
        let auth = AuthHeader {
            name: "authorization",
            prefix: "Bearer ",
            secret: api_key,
        };
        chat_bridge::invoke(&self.base_url, &auth, request).await
    }

    async fn invoke_stream(
        &self,
        _ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
        let api_key = self.api_key(credential)?;
        let auth = AuthHeader {
            name: "authorization",
            prefix: "Bearer ",
            secret: api_key,
        };
        chat_bridge::invoke_stream(&self.base_url, &auth, request).await
    }

    async fn list_models(&self, credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
        let api_key = self.api_key(credential)?;
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let client = shared_client()?;
        let response = client
            .get(&url)
            .header("authorization", format!("Bearer {api_key}"))
            .send()
            .await
            .map_err(|err| gateway_provider_core::ProviderError::Other(err.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| gateway_provider_core::ProviderError::Other(err.to_string()))?;
        let entries = body
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let id = entry.get("id")?.as_str()?.to_string();
                let context_length = entry
                    .get("context_length")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32);
                let pricing = entry
                    .get("pricing")
                    .map(|p| Pricing {
                        prompt: p
                            .get("prompt")
                            .and_then(|v| v.as_str())
                            .unwrap_or("0")
                            .to_string(),
                        completion: p
                            .get("completion")
                            .and_then(|v| v.as_str())
                            .unwrap_or("0")
                            .to_string(),
                        request: p
                            .get("request")
                            .and_then(|v| v.as_str())
                            .unwrap_or("0")
                            .to_string(),
                    })
                    .unwrap_or_default();
                Some(ModelEntry {
                    id: format!("{PROVIDER_NAME}/{id}"),
                    object: "model".to_string(),
                    source_gateway: PROVIDER_NAME.to_string(),
                    display_name: id,
                    context_length,
                    pricing,
                    modality: Modality::default(),
                    huggingface: None,
                    raw_upstream: Some(entry),
                })
            })
            .collect())
    }
}
