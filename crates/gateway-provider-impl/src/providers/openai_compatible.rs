//! One configurable adapter reused for every provider whose wire protocol is
//! already OpenAI chat-completions shaped: the bespoke OpenRouter, Portkey
//! and DeepInfra adapters all delegate here, as does the generic
//! `OpenAICompatible` family (Fireworks, Together, Groq, Cerebras, xAI,
//! Novita, Nebius, Vercel AI Gateway, Featherless, Near, AIMO).

use async_trait::async_trait;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{ModelEntry, Modality, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::{Credential, Provider, ProviderResult, UpstreamCtx};

use crate::chat_bridge::{self, AuthHeader};
use crate::http_client::shared_client;

/// Shared adapter body. `name` is both the provider slug used for
/// `source_gateway` tagging and the registry key.
pub struct OpenAICompatibleProvider {
    name: &'static str,
    base_url: String,
    auth_header_name: String,
    auth_header_prefix: String,
}

impl OpenAICompatibleProvider {
    pub fn new(
        name: &'static str,
        base_url: impl Into<String>,
        auth_header_name: impl Into<String>,
        auth_header_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            auth_header_name: auth_header_name.into(),
            auth_header_prefix: auth_header_prefix.into(),
        }
    }

    fn auth<'a>(&'a self, api_key: &'a str) -> AuthHeader<'a> {
        AuthHeader {
            name: &self.auth_header_name,
            prefix: &self.auth_header_prefix,
            secret: api_key,
        }
    }

    fn api_key<'a>(&self, credential: &'a Credential) -> ProviderResult<&'a str> {
        match credential {
            Credential::ApiKey(cred) => Ok(cred.api_key.as_str()),
            Credential::ServiceAccount(_) => Err(wrong_credential_shape(self.name)),
        }
    }
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(
        &self,
        _ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let api_key = self.api_key(credential)?;
        chat_bridge::invoke(&self.base_url, &self.auth(api_key), request).await
    }

    async fn invoke_stream(
        &self,
        _ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
        let api_key = self.api_key(credential)?;
        chat_bridge::invoke_stream(&self.base_url, &self.auth(api_key), request).await
    }

    async fn list_models(&self, credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
        let api_key = self.api_key(credential)?;
        let url = format!("{}/models", self.base_url.trim_end_matches('/'));
        let client = shared_client()?;
        let response = client
            .get(&url)
            .header(
                self.auth_header_name.as_str(),
                format!("{}{}", self.auth_header_prefix, api_key),
            )
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
                id: format!("{}/{}", self.name, id),
                object: "model".to_string(),
                source_gateway: self.name.to_string(),
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
