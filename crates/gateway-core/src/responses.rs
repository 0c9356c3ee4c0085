//! `POST /v1/responses`: the single-turn text-in/text-out slice of the
//! Responses API, translated into a one-message chat-completion request and
//! run through the same gate/router/accounting pipeline as
//! `/v1/chat/completions`. Streaming responses and multi-turn tool use are
//! out of scope, see [`gateway_protocol::openai::responses`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use gateway_accounting::ChargeRequest;
use gateway_gate::{RequestMeta, RouteMeta};
use gateway_protocol::openai::chat::{ChatCompletionRequest, ChatMessage, MessageContent, MessageRole};
use gateway_protocol::openai::responses::{CreateResponseRequest, ResponseEnvelope};
use gateway_router::DispatchRequest;
use uuid::Uuid;

use crate::chat::{client_ip, extract_bearer_header, header_str, release, router_error_into_api_error};
use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;
use crate::validate::validate_response_request;

pub async fn create_response(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let environment = state.deployment_environment;
    match handle(&state, &headers, body, &trace_id).await {
        Ok(response) => response,
        Err(err) => err.into_response_for(environment),
    }
}

async fn handle(state: &Arc<AppState>, headers: &HeaderMap, body: Bytes, trace_id: &str) -> Result<Response, ApiError> {
    let token = extract_bearer_header(headers).ok_or(ApiError::new(ErrorCode::Unauthenticated, "missing bearer token"))?;

    let request: CreateResponseRequest =
        serde_json::from_slice(&body).map_err(|err| ApiError::bad_request(format!("malformed request body: {err}")))?;
    if request.stream == Some(true) {
        return Err(ApiError::bad_request("streaming is not supported on /v1/responses"));
    }
    validate_response_request(&request)?;

    let route = RouteMeta { required_scope: None };
    let request_meta = RequestMeta {
        ip: client_ip(headers),
        referrer: header_str(headers, header::REFERER).map(str::to_string),
    };
    let admission = state.gate.admit(token, &route, &request_meta).await?;
    let user_id = admission.user.id;
    let api_key_id = admission.api_key.id;

    let chat_request = ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage {
            role: MessageRole::User,
            content: MessageContent::Text(request.input.clone()),
            name: None,
            tool_call_id: None,
        }],
        temperature: request.temperature,
        top_p: None,
        top_k: None,
        max_tokens: request.max_output_tokens,
        presence_penalty: None,
        frequency_penalty: None,
        stream: None,
        n: None,
        tools: None,
        tool_choice: None,
        gateway: request.gateway.clone(),
    };

    let started = Instant::now();
    let dispatch_request = DispatchRequest {
        request: &chat_request,
        trace_id: Some(trace_id.to_string()),
        user_id: Some(user_id),
    };

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
            release(state, admission.permit, gateway_gate::ReleaseOutcome::Completed).await;
            charge_result?;

            let output_text = outcome
                .response
                .choices
                .first()
                .and_then(|choice| choice.message.content.clone())
                .unwrap_or_default();
            Ok(Json(ResponseEnvelope {
                id: format!("resp_{trace_id}"),
                object: "response".to_string(),
                created: outcome.response.created,
                model: request.model,
                status: "completed".to_string(),
                output_text,
                usage: outcome.response.usage,
            })
            .into_response())
        }
        Err(err) => {
            release(state, admission.permit, gateway_gate::ReleaseOutcome::Aborted).await;
            Err(router_error_into_api_error(err, trace_id))
        }
    }
}
