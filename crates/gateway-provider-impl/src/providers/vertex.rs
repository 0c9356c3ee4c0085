//! Vertex AI: service-account JWT auth (signing lives in
//! `gateway_provider_core::vertex_auth`) plus a `generateContent` wire shape
//! this adapter translates to/from the canonical chat schema.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{
    ChatCompletionChoice, ChatCompletionChunk, ChatCompletionMessage, ChatCompletionRequest,
    ChatCompletionResponse, MessageRole, Usage,
};
use gateway_protocol::openai::models::{Modality, ModelEntry, Pricing};
use gateway_provider_core::provider::wrong_credential_shape;
use gateway_provider_core::vertex_auth;
use gateway_provider_core::{
    Credential, Provider, ProviderError, ProviderErrorKind, ProviderResult, UpstreamCtx,
};

use crate::http_client::shared_client;

const PROVIDER_NAME: &str = "vertex";

pub struct VertexProvider {
    base_url: String,
    location: String,
    token_uri: String,
}

impl VertexProvider {
    pub fn new(base_url: impl Into<String>, location: impl Into<String>, token_uri: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            location: location.into(),
            token_uri: token_uri.into(),
        }
    }

    fn service_account<'a>(
        &self,
        credential: &'a Credential,
    ) -> ProviderResult<&'a gateway_provider_core::ServiceAccountCredential> {
        match credential {
            Credential::ServiceAccount(sa) => Ok(sa),
            Credential::ApiKey(_) => Err(wrong_credential_shape(PROVIDER_NAME)),
        }
    }

    async fn access_token(&self, credential: &Credential) -> ProviderResult<String> {
        let sa = self.service_account(credential)?;
        if let Some((token, _exp)) = vertex_auth::cached_token(sa)? {
            return Ok(token);
        }
        let token_request = vertex_auth::build_token_request(sa, &self.token_uri)?;
        let client = shared_client()?;
        let mut request = client.post(&token_request.url);
        for (name, value) in &token_request.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &token_request.body {
            request = request.body(body.to_vec());
        }
        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        let (token, _exp) = vertex_auth::parse_and_store_token(&sa.client_email, &body)?;
        Ok(token)
    }

    fn endpoint(&self, project_id: &str, model: &str, method: &str) -> String {
        let base = self
            .base_url
            .replace("{location}", &self.location)
            .trim_end_matches('/')
            .to_string();
        format!(
            "{base}/projects/{project_id}/locations/{}/publishers/google/models/{model}:{method}",
            self.location
        )
    }

    fn to_vertex_body(request: &ChatCompletionRequest) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                json!({
                    "role": if m.role == MessageRole::Assistant { "model" } else { "user" },
                    "parts": [{"text": m.content.as_text_lossy()}],
                })
            })
            .collect();
        let system_instruction: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_text_lossy())
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "topP": request.top_p,
                "topK": request.top_k,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if !system_instruction.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system_instruction.join("\n")}]});
        }
        body
    }

    fn from_vertex_body(model: &str, body: &serde_json::Value) -> ChatCompletionResponse {
        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let finish_reason = body
            .pointer("/candidates/0/finishReason")
            .and_then(|v| v.as_str())
            .map(str::to_lowercase);
        let prompt_tokens = body
            .pointer("/usageMetadata/promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = body
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let estimated = prompt_tokens == 0 && completion_tokens == 0 && !text.is_empty();
        let usage = if estimated {
            Usage::estimate_from_chars(0, text.chars().count())
        } else {
            Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                estimated: false,
            }
        };

        ChatCompletionResponse {
            id: format!("vertex-{model}"),
            object: "chat.completion".to_string(),
            created: 0,
            model: model.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage {
                    role: MessageRole::Assistant,
                    content: Some(text),
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage,
        }
    }
}

#[async_trait]
impl Provider for VertexProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn invoke(
        &self,
        _ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        let sa = self.service_account(credential)?;
        let token = self.access_token(credential).await?;
        let url = self.endpoint(&sa.project_id, &request.model, "generateContent");
        let body = Self::to_vertex_body(request);

        let client = shared_client()?;
        let response = client
            .post(&url)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream {
                kind: ProviderErrorKind::from_status(status),
                message,
                status: Some(status),
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        Ok(Self::from_vertex_body(&request.model, &value))
    }

    async fn invoke_stream(
        &self,
        _ctx: &UpstreamCtx,
        _credential: &Credential,
        _request: &ChatCompletionRequest,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
        Err(ProviderError::Unsupported(
            "vertex streaming is not implemented",
        ))
    }

    async fn list_models(&self, _credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
        Ok(vec![ModelEntry {
            id: format!("{PROVIDER_NAME}/gemini-1.5-pro"),
            object: "model".to_string(),
            source_gateway: PROVIDER_NAME.to_string(),
            display_name: "gemini-1.5-pro".to_string(),
            context_length: Some(1_000_000),
            pricing: Pricing::default(),
            modality: Modality {
                input: vec!["text".to_string(), "image".to_string()],
                output: vec!["text".to_string()],
            },
            huggingface: None,
            raw_upstream: None,
        }])
    }
}
