//! Portkey fronts many sub-providers (`@deepinfra/...`, `@groq/...`) behind
//! one OpenAI-chat-shaped endpoint; translating the model id to carry the
//! right `@sub/` prefix is the router/catalog's job (see `gateway-catalog`'s
//! merge precedence), not this adapter's: it forwards whatever model id the
//! router resolved.

use async_trait::async_trait;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{Modality, ModelEntry, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::{Credential, Provider, ProviderResult, UpstreamCtx};

use crate::chat_bridge::{self, AuthHeader};
use crate::http_client::shared_client;

const PROVIDER_NAME: &str = "portkey";

pub struct PortkeyProvider {
    base_url: String,
}

impl PortkeyProvider {
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
impl Provider for PortkeyProvider {
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
            name: "x-portkey-api-key",
            prefix: "",
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
            name: "x-portkey-api-key",
            prefix: "",
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
            .header("x-portkey-api-key", api_key)
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
            .filter_map(|entry| entry.get("id")?.as_str().map(str::to_string))
            .map(|id| ModelEntry {
                id: format!("{PROVIDER_NAME}/{id}"),
                object: "model".to_string(),
                source_gateway: PROVIDER_NAME.to_string(),
                display_name: id,
                context_length: None,
                pricing: Pricing::default(),
                modality: Modality::default(),
                huggingface: None,
                raw_upstream: None,
            })
            .collect())
    }
}
