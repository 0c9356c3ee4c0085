//! DeepInfra is routed through an aggregator that silently 502s unless every
//! request carries an explicit `upstream_provider` hint in the body.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{Modality, ModelEntry, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::{Credential, Provider, ProviderResult, UpstreamCtx};

use crate::chat_bridge::{self, AuthHeader};
use crate::http_client::shared_client;

const PROVIDER_NAME: &str = "deepinfra";

pub struct DeepInfraProvider {
    base_url: String,
    upstream_provider_hint: String,
}

impl DeepInfraProvider {
    pub fn new(base_url: impl Into<String>, upstream_provider_hint: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            upstream_provider_hint: upstream_provider_hint.into(),
        }
    }

    fn api_key<'a>(&self, credential: &'a Credential) -> ProviderResult<&'a str> {
        match credential {
            Credential::ApiKey(cred) => Ok(cred.api_key.as_str()),
            Credential::ServiceAccount(_) => Err(wrong_credential_shape(PROVIDER_NAME)),
        }
    }

    fn extra_fields(&self) -> [(&str, serde_json::Value); 1] {
        [("upstream_provider", json!(self.upstream_provider_hint))]
    }
}

#[async_trait]
impl Provider for DeepInfraProvider {
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
        chat_bridge::invoke_with_extra_fields(&self.base_url, &auth, request, &self.extra_fields())
            .await
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
        chat_bridge::invoke_stream_with_extra_fields(
            &self.base_url,
            &auth,
            request,
            &self.extra_fields(),
        )
        .await
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
