//! `POST /v1/chat/completions`: validate, admit, dispatch, bill, respond,
//! either a single JSON body or an SSE stream. Every exit path releases the
//! `Permit` the gate handed out, and a disconnected stream still bills
//! whatever tokens were produced before the client went away.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::stream;
use gateway_accounting::ChargeRequest;
use gateway_gate::{Permit, ReleaseOutcome, RequestMeta, RouteMeta};
use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, Usage};
use gateway_router::{DispatchRequest, RouterError};
use gateway_storage::Storage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{classify_provider_error, ApiError, ErrorCode};
use crate::sse;
use crate::state::AppState;
use crate::validate::validate_chat_request;

pub async fn chat_completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let environment = state.deployment_environment;
    match handle(&state, &headers, body, &trace_id).await {
        Ok(response) => response,
        Err(err) => err.into_response_for(environment),
    }
}

async fn handle(state: &Arc<AppState>, headers: &HeaderMap, body: Bytes, trace_id: &str) -> Result<Response, ApiError> {
    let token = extract_bearer_header(headers).ok_or(ApiError::new(ErrorCode::Unauthenticated, "missing bearer token"))?;

    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("malformed request body: {err}")))?;
    validate_chat_request(&request)?;

    let route = RouteMeta { required_scope: None };
    let request_meta = RequestMeta {
        ip: client_ip(headers),
        referrer: header_str(headers, header::REFERER).map(str::to_string),
    };
    let admission = state.gate.admit(token, &route, &request_meta).await?;
    let user_id = admission.user.id;
    let api_key_id = admission.api_key.id;

    let dispatch_request = DispatchRequest {
        request: &request,
        trace_id: Some(trace_id.to_string()),
        user_id: Some(user_id),
    };
    let streaming = request.stream == Some(true);
    let started = Instant::now();

    if streaming {
        match state.router.dispatch_stream(dispatch_request).await {
            Ok(outcome) => {
                tracing::info!(trace_id, user_id, gateway = %outcome.gateway, "chat stream started");
                Ok(stream_response(
                    state.clone(),
                    admission.permit,
                    api_key_id,
                    user_id,
                    request,
                    outcome,
                    trace_id.to_string(),
                    started,
                ))
            }
            Err(err) => {
                release(state, admission.permit, ReleaseOutcome::Aborted).await;
                Err(router_error_into_api_error(err, trace_id))
            }
        }
    } else {
        match state.router.dispatch(dispatch_request).await {
            Ok(outcome) => {
                let prompt_tokens = outcome.response.usage.prompt_tokens as i64;
                let completion_tokens = outcome.response.usage.completion_tokens as i64;
                let charge = ChargeRequest {
                    user_id,
                    api_key_id: Some(api_key_id),
                    model: request.model.clone(),
                    gateway: outcome.gateway.clone(),
                    prompt_tokens,
                    completion_tokens,
                    pricing: outcome.pricing,
                    latency_ms: started.elapsed().as_millis() as i64,
                    outcome: gateway_accounting::RequestOutcome::Success,
                    correlation_id: Some(trace_id.to_string()),
                };
                let charge_result = state.accounting.charge(charge).await;
                release(state, admission.permit, ReleaseOutcome::Completed).await;
                charge_result?;
                tracing::info!(
                    trace_id,
                    user_id,
                    gateway = %outcome.gateway,
                    attempts = outcome.trace.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "chat completion served"
                );
                Ok(Json(outcome.response).into_response())
            }
            Err(err) => {
                release(state, admission.permit, ReleaseOutcome::Aborted).await;
                Err(router_error_into_api_error(err, trace_id))
            }
        }
    }
}

pub(crate) fn router_error_into_api_error(err: RouterError, trace_id: &str) -> ApiError {
    let api_err: ApiError = err.into();
    tracing::warn!(trace_id, code = api_err.code.as_str(), "chat completion failed");
    api_err
}

pub(crate) async fn release(state: &Arc<AppState>, permit: Permit, outcome: ReleaseOutcome) {
    if let Err(err) = permit.release(state.storage.as_ref() as &dyn Storage, outcome).await {
        tracing::error!(error = %err, "failed to release admission permit");
    }
}

pub(crate) fn extract_bearer_header(headers: &HeaderMap) -> Option<&str> {
    gateway_gate::extract_bearer(header_str(headers, header::AUTHORIZATION))
}

pub(crate) fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn client_ip(headers: &HeaderMap) -> Option<std::net::IpAddr> {
    header_str(headers, header::HeaderName::from_static("x-forwarded-for"))
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .and_then(|ip| ip.parse().ok())
}

/// Spawns the task that drains the router's chunk receiver, forwards each
/// chunk to the client as an SSE event, and bills whatever was produced once
/// the stream ends: normally, on a mid-stream upstream error, or because the
/// client disconnected (detected by the forwarding channel closing).
#[allow(clippy::too_many_arguments)]
fn stream_response(
    state: Arc<AppState>,
    permit: Permit,
    api_key_id: i64,
    user_id: i64,
    request: ChatCompletionRequest,
    outcome: gateway_router::StreamOutcome,
    trace_id: String,
    started: Instant,
) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(16);

    tokio::spawn(async move {
        let gateway = outcome.gateway.clone();
        let model = request.model.clone();
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.as_text_lossy().len()).sum();

        let mut completion_chars = 0usize;
        let mut usage: Option<Usage> = None;
        let mut produced_any = false;
        let mut disconnected = false;
        let mut outcome_kind = gateway_accounting::RequestOutcome::Success;

        let mut pending = Some(outcome.first_chunk);
        let mut rest = outcome.rest;

        loop {
            let next = match pending.take() {
                Some(chunk) => Some(chunk),
                None => rest.recv().await,
            };
            let Some(chunk_result) = next else { break };

            match chunk_result {
                Ok(chunk) => {
                    produced_any = true;
                    accumulate_chunk(&chunk, &mut completion_chars, &mut usage);
                    let payload = serde_json::to_value(&chunk).unwrap_or(serde_json::Value::Null);
                    if tx.send(sse::encode_event(&payload)).await.is_err() {
                        disconnected = true;
                        outcome_kind = gateway_accounting::RequestOutcome::PartialStream;
                        break;
                    }
                }
                Err(failure) => {
                    outcome_kind = if produced_any {
                        gateway_accounting::RequestOutcome::PartialStream
                    } else {
                        gateway_accounting::RequestOutcome::FatalNoTokens
                    };
                    let (code, message) = classify_provider_error(failure.kind(), &gateway);
                    let _ = tx.send(sse::encode_error(code, &message)).await;
                    break;
                }
            }
        }

        if !disconnected {
            let _ = tx.send(sse::encode_done()).await;
        }

        let usage = usage.unwrap_or_else(|| Usage::estimate_from_chars(prompt_chars, completion_chars));
        let charge = ChargeRequest {
            user_id,
            api_key_id: Some(api_key_id),
            model,
            gateway,
            prompt_tokens: usage.prompt_tokens as i64,
            completion_tokens: usage.completion_tokens as i64,
            pricing: outcome.pricing,
            latency_ms: started.elapsed().as_millis() as i64,
            outcome: outcome_kind,
            correlation_id: Some(trace_id.clone()),
        };
        if let Err(err) = state.accounting.charge(charge).await {
            tracing::error!(trace_id = %trace_id, error = %err, "failed to bill streamed chat completion");
        }
        if let Err(err) = permit.release(state.storage.as_ref() as &dyn Storage, ReleaseOutcome::Completed).await {
            tracing::error!(trace_id = %trace_id, error = %err, "failed to release admission permit after stream");
        }
    });

    let body_stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|bytes| (Ok::<_, std::io::Error>(bytes), rx)) });
    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));
    response
}

fn accumulate_chunk(chunk: &ChatCompletionChunk, completion_chars: &mut usize, usage: &mut Option<Usage>) {
    for choice in &chunk.choices {
        if let Some(content) = &choice.delta.content {
            *completion_chars += content.len();
        }
    }
    if let Some(chunk_usage) = chunk.usage {
        *usage = Some(chunk_usage);
    }
}
