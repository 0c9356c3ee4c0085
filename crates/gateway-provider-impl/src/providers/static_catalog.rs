//! Fal.ai and Chutes ship a fixed catalog (no listing endpoint) loaded from
//! config at startup; the cache TTL is effectively infinite since it only
//! changes on a process restart with new config.

use async_trait::async_trait;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{Modality, ModelEntry, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::{Credential, ModelTable, Provider, ProviderResult, UpstreamCtx};

use crate::chat_bridge::{self, AuthHeader};

pub struct StaticCatalogProvider {
    name: &'static str,
    base_url: String,
    model_table: ModelTable,
}

impl StaticCatalogProvider {
    pub fn new(name: &'static str, base_url: impl Into<String>, model_table: ModelTable) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            model_table,
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
impl Provider for StaticCatalogProvider {
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

    async fn list_models(&self, _credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
        Ok(self
            .model_table
            .models
            .iter()
            .map(|record| ModelEntry {
                id: format!("{}/{}", self.name, record.id),
                object: "model".to_string(),
                source_gateway: self.name.to_string(),
                display_name: record
                    .display_name
                    .clone()
                    .unwrap_or_else(|| record.id.clone()),
                context_length: None,
                pricing: Pricing::default(),
                modality: Modality::default(),
                huggingface: None,
                raw_upstream: None,
            })
            .collect())
    }
}
