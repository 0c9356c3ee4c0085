//! HuggingFace Inference Providers: an OpenAI-chat-shaped router endpoint,
//! but a catalog that caps any single listing query at 1000 items. Models
//! are harvested by re-querying with different sort keys and deduplicating,
//! the documented technique for exceeding that cap.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{HuggingFaceMetrics, Modality, ModelEntry, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::{Credential, Provider, ProviderResult, UpstreamCtx};

use crate::chat_bridge::{self, AuthHeader};
use crate::http_client::shared_client;

const PROVIDER_NAME: &str = "huggingface";
const HARD_CAP: usize = 50_000;
const UNAUTHENTICATED_BATCH_DELAY: Duration = Duration::from_millis(500);

pub struct HuggingFaceProvider {
    base_url: String,
    fetch_sorts: Vec<String>,
}

impl HuggingFaceProvider {
    pub fn new(base_url: impl Into<String>, fetch_sorts: Vec<String>) -> Self {
        Self {
            base_url: base_url.into(),
            fetch_sorts,
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
impl Provider for HuggingFaceProvider {
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
        let authenticated = !api_key.trim().is_empty();
        let client = shared_client()?;

        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::new();

        for (i, sort) in self.fetch_sorts.iter().enumerate() {
            if i > 0 && !authenticated {
                sleep(UNAUTHENTICATED_BATCH_DELAY).await;
            }
            let url = format!(
                "{}/models?sort={sort}&limit=1000",
                self.base_url.trim_end_matches('/')
            );
            let mut request = client.get(&url);
            if authenticated {
                request = request.header("authorization", format!("Bearer {api_key}"));
            }
            let response = request
                .send()
                .await
                .map_err(|err| gateway_provider_core::ProviderError::Other(err.to_string()))?;
            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|err| gateway_provider_core::ProviderError::Other(err.to_string()))?;
            let items = body.as_array().cloned().unwrap_or_default();

            for item in items {
                if entries.len() >= HARD_CAP {
                    break;
                }
                let Some(id) = item.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
                    continue;
                };
                if !seen.insert(id.clone()) {
                    continue;
                }
                let likes = item.get("likes").and_then(|v| v.as_u64());
                let downloads = item.get("downloads").and_then(|v| v.as_u64());
                entries.push(ModelEntry {
                    id: format!("{PROVIDER_NAME}/{id}"),
                    object: "model".to_string(),
                    source_gateway: PROVIDER_NAME.to_string(),
                    display_name: id,
                    context_length: None,
                    pricing: Pricing::default(),
                    modality: Modality::default(),
                    huggingface: Some(HuggingFaceMetrics { likes, downloads }),
                    raw_upstream: None,
                });
            }
        }
        Ok(entries)
    }
}
