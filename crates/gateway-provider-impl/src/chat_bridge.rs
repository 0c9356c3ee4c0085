//! Shared request/response plumbing for every adapter whose upstream wire
//! protocol is already OpenAI chat-completions shaped: OpenRouter, Portkey,
//! DeepInfra, and the generic `OpenAICompatible` family. Each adapter
//! supplies the base URL and auth header; everything else (JSON body,
//! response parsing, SSE chunk decoding, usage estimation, error
//! classification) is identical.

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use gateway_protocol::openai::chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Usage,
};
use gateway_protocol::sse::SseParser;
use gateway_provider_core::errors::ProviderErrorKind;
use gateway_provider_core::{Headers, ProviderError, ProviderResult, header_set};

use crate::http_client::shared_client;

const DONE_SENTINEL: &str = "[DONE]";

pub struct AuthHeader<'a> {
    pub name: &'a str,
    pub prefix: &'a str,
    pub secret: &'a str,
}

fn apply_auth(headers: &mut Headers, auth: &AuthHeader<'_>) {
    header_set(
        headers,
        auth.name,
        format!("{}{}", auth.prefix, auth.secret),
    );
}

fn request_body(
    request: &ChatCompletionRequest,
    stream: bool,
    extra_fields: &[(&str, serde_json::Value)],
) -> ProviderResult<Bytes> {
    let mut value = serde_json::to_value(request).map_err(|err| ProviderError::Other(err.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("stream".to_string(), serde_json::Value::Bool(stream));
        for (key, val) in extra_fields {
            obj.insert(key.to_string(), val.clone());
        }
    }
    serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(|err| ProviderError::Other(err.to_string()))
}

fn prompt_chars(request: &ChatCompletionRequest) -> usize {
    request
        .messages
        .iter()
        .map(|m| m.content.as_text_lossy().chars().count())
        .sum()
}

async fn classify_error_response(response: wreq::Response) -> ProviderError {
    let status = response.status().as_u16();
    let kind = ProviderErrorKind::from_status(status);
    let message = response
        .text()
        .await
        .unwrap_or_else(|err| format!("<unreadable body: {err}>"));
    ProviderError::Upstream {
        kind,
        message,
        status: Some(status),
    }
}

/// Sends a non-streaming chat completion and returns the canonical response,
/// filling in an estimated `usage` when the upstream omits it.
pub async fn invoke(
    base_url: &str,
    auth: &AuthHeader<'_>,
    request: &ChatCompletionRequest,
) -> ProviderResult<ChatCompletionResponse> {
    invoke_with_extra_fields(base_url, auth, request, &[]).await
}

/// As [`invoke`], but merges `extra_fields` into the outgoing JSON body.
/// DeepInfra is the one adapter that needs this, for its `upstream_provider`
/// routing hint.
pub async fn invoke_with_extra_fields(
    base_url: &str,
    auth: &AuthHeader<'_>,
    request: &ChatCompletionRequest,
    extra_fields: &[(&str, serde_json::Value)],
) -> ProviderResult<ChatCompletionResponse> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let body = request_body(request, false, extra_fields)?;

    let mut raw_headers: Headers = Vec::new();
    apply_auth(&mut raw_headers, auth);
    header_set(&mut raw_headers, "content-type", "application/json");

    let client = shared_client()?;
    let mut builder = client.post(&url);
    for (name, value) in &raw_headers {
        builder = builder.header(name, value);
    }
    let response = builder
        .body(body)
        .send()
        .await
        .map_err(|err| ProviderError::Upstream {
            kind: ProviderErrorKind::Network,
            message: err.to_string(),
            status: None,
        })?;

    if !response.status().is_success() {
        return Err(classify_error_response(response).await);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let mut value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|err| ProviderError::Other(err.to_string()))?;

    let usage_present = value
        .get("usage")
        .map(|u| !u.is_null())
        .unwrap_or(false);
    if !usage_present {
        let completion_chars: usize = value
            .get("choices")
            .and_then(|c| c.as_array())
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|c| c.pointer("/message/content"))
                    .filter_map(|c| c.as_str())
                    .map(|s| s.chars().count())
                    .sum()
            })
            .unwrap_or(0);
        let usage = Usage::estimate_from_chars(prompt_chars(request), completion_chars);
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "usage".to_string(),
                serde_json::to_value(usage).map_err(|err| ProviderError::Other(err.to_string()))?,
            );
        }
    }

    serde_json::from_value(value).map_err(|err| ProviderError::Other(err.to_string()))
}

/// Sends a streaming chat completion, returning a channel of canonical
/// chunks. The sender task keeps running after the caller stops polling
/// until the upstream body ends; the channel closing is itself the
/// "stream finished" signal (no separate done flag is surfaced).
pub async fn invoke_stream(
    base_url: &str,
    auth: &AuthHeader<'_>,
    request: &ChatCompletionRequest,
) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
    invoke_stream_with_extra_fields(base_url, auth, request, &[]).await
}

/// As [`invoke_stream`], but merges `extra_fields` into the outgoing JSON body.
pub async fn invoke_stream_with_extra_fields(
    base_url: &str,
    auth: &AuthHeader<'_>,
    request: &ChatCompletionRequest,
    extra_fields: &[(&str, serde_json::Value)],
) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let body = request_body(request, true, extra_fields)?;

    let mut raw_headers: Headers = Vec::new();
    apply_auth(&mut raw_headers, auth);
    header_set(&mut raw_headers, "content-type", "application/json");
    header_set(&mut raw_headers, "accept", "text/event-stream");

    let client = shared_client()?;
    let mut builder = client.post(&url);
    for (name, value) in &raw_headers {
        builder = builder.header(name, value);
    }
    let response = builder
        .body(body)
        .send()
        .await
        .map_err(|err| ProviderError::Upstream {
            kind: ProviderErrorKind::Network,
            message: err.to_string(),
            status: None,
        })?;

    if !response.status().is_success() {
        return Err(classify_error_response(response).await);
    }

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        let mut byte_stream = response.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = tx
                        .send(Err(ProviderError::Upstream {
                            kind: ProviderErrorKind::Network,
                            message: err.to_string(),
                            status: None,
                        }))
                        .await;
                    return;
                }
            };
            for event in parser.push_bytes(&chunk) {
                if event.data.trim() == DONE_SENTINEL {
                    return;
                }
                match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                    Ok(parsed) => {
                        if tx.send(Ok(parsed)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx
                            .send(Err(ProviderError::Other(format!(
                                "malformed stream chunk: {err}"
                            ))))
                            .await;
                        return;
                    }
                }
            }
        }
        for event in parser.finish() {
            if event.data.trim() != DONE_SENTINEL
                && let Ok(parsed) = serde_json::from_str::<ChatCompletionChunk>(&event.data)
            {
                let _ = tx.send(Ok(parsed)).await;
            }
        }
    });
    Ok(rx)
}
