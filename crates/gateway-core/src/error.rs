//! Maps every user-visible failure to a stable `code` string and HTTP status,
//! per the error taxonomy: client errors, upstream errors, and the catch-all
//! internal error reserved for bugs rather than predictable upstream
//! failures. Internal detail (stack traces, raw upstream bodies) is logged
//! unconditionally but only echoed back to the caller in `staging`/`dev`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use gateway_common::Environment;
use gateway_provider_core::ProviderErrorKind;
use gateway_router::RouterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthenticated,
    Forbidden,
    RateLimited,
    BadRequest,
    ModelNotFound,
    ContextTooLong,
    ContentFiltered,
    InsufficientCredits,
    TrialExhausted,
    UpstreamUnavailable,
    UpstreamTimeout,
    ContentUnknownError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::ModelNotFound => "model_not_found",
            ErrorCode::ContextTooLong => "context_too_long",
            ErrorCode::ContentFiltered => "content_filtered",
            ErrorCode::InsufficientCredits => "insufficient_credits",
            ErrorCode::TrialExhausted => "trial_exhausted",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::UpstreamTimeout => "upstream_timeout",
            ErrorCode::ContentUnknownError => "content_unknown_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ModelNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ContextTooLong => StatusCode::BAD_REQUEST,
            ErrorCode::ContentFiltered => StatusCode::BAD_REQUEST,
            ErrorCode::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            ErrorCode::TrialExhausted => StatusCode::PAYMENT_REQUIRED,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::ContentUnknownError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A user-visible failure. `detail` carries the internal message (upstream
/// body, stack-shaped text) and is only serialized when the deployment
/// environment permits it.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<String>,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            retry_after_secs: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Builds the response body, logging internal detail unconditionally
    /// and echoing it back to the caller only when `environment` permits.
    pub fn into_response_for(self, environment: Environment) -> Response {
        let status = self.code.status();
        if status.is_server_error() {
            tracing::error!(code = self.code.as_str(), detail = ?self.detail, "{}", self.message);
        } else {
            tracing::warn!(code = self.code.as_str(), "{}", self.message);
        }

        let show_detail = matches!(environment, Environment::Staging | Environment::Development);
        let body = ErrorBody {
            error: ErrorPayload {
                code: self.code.as_str(),
                message: self.message.clone(),
                detail: if show_detail { self.detail.clone() } else { None },
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response.headers_mut().insert("retry-after", secs.into());
        }
        response
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Same taxonomy, shaped for embedding inside an SSE `data:` event rather
/// than a full HTTP response (`sse.rs` calls this for mid-stream failures).
pub fn error_json(code: ErrorCode, message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "code": code.as_str(), "message": message } })
}

impl From<gateway_gate::GateError> for ApiError {
    fn from(err: gateway_gate::GateError) -> Self {
        use gateway_gate::GateError as G;
        match err {
            G::Unauthenticated => ApiError::new(ErrorCode::Unauthenticated, "invalid or expired credential"),
            G::Forbidden(reason) => ApiError::new(ErrorCode::Forbidden, reason),
            G::RateLimited { retry_after_secs } => ApiError {
                code: ErrorCode::RateLimited,
                message: "rate limit exceeded".to_string(),
                detail: None,
                retry_after_secs: Some(retry_after_secs),
            },
            G::InsufficientCredits => ApiError::new(ErrorCode::InsufficientCredits, "insufficient credit balance"),
            G::TrialExhausted => ApiError::new(ErrorCode::TrialExhausted, "trial allowance exhausted"),
            G::Storage(source) => {
                ApiError::new(ErrorCode::InternalError, "storage error").with_detail(source.to_string())
            }
        }
    }
}

impl From<gateway_accounting::AccountingError> for ApiError {
    fn from(err: gateway_accounting::AccountingError) -> Self {
        ApiError::new(ErrorCode::InternalError, "accounting error").with_detail(err.to_string())
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NotFound(model) => {
                ApiError::new(ErrorCode::ModelNotFound, format!("no route to model {model:?}"))
            }
            RouterError::NoCredential(gateway) => ApiError::new(
                ErrorCode::UpstreamUnavailable,
                format!("no credential configured for gateway {gateway}"),
            ),
            RouterError::Upstream { gateway, source } => {
                let (code, message) = classify_provider_error(source.kind(), &gateway);
                ApiError::new(code, message).with_detail(source.to_string())
            }
        }
    }
}

pub(crate) fn classify_provider_error(kind: ProviderErrorKind, gateway: &str) -> (ErrorCode, String) {
    match kind {
        ProviderErrorKind::NotFound => (
            ErrorCode::ModelNotFound,
            format!("{gateway} reported the model as unknown"),
        ),
        ProviderErrorKind::BadRequest => (ErrorCode::BadRequest, "upstream rejected the request".to_string()),
        ProviderErrorKind::ContentFilter => {
            (ErrorCode::ContentFiltered, "content was filtered by the upstream provider".to_string())
        }
        ProviderErrorKind::ContextTooLong => {
            (ErrorCode::ContextTooLong, "prompt exceeds the model's context window".to_string())
        }
        ProviderErrorKind::Timeout => (ErrorCode::UpstreamTimeout, format!("{gateway} timed out")),
        ProviderErrorKind::Auth
        | ProviderErrorKind::RateLimited
        | ProviderErrorKind::Upstream5xx
        | ProviderErrorKind::Network => (
            ErrorCode::UpstreamUnavailable,
            format!("every candidate gateway failed (last: {gateway})"),
        ),
        ProviderErrorKind::Unknown => (
            ErrorCode::ContentUnknownError,
            format!("{gateway} returned an unclassified error"),
        ),
    }
}
