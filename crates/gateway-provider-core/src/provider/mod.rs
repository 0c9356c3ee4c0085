use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::ModelEntry;

use crate::headers::{Headers, header_get};
use crate::{Credential, ProviderError, ProviderResult, UnavailableReason};

pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

/// Per-attempt context threaded from the router into the adapter: trace id
/// for log correlation, which credential was acquired, and the attempt
/// ordinal within this request's `AttemptTrace`.
#[derive(Debug, Clone)]
pub struct UpstreamCtx {
    pub trace_id: Option<String>,
    pub user_id: Option<i64>,
    pub gateway: String,
    pub credential_id: Option<i64>,
    pub attempt_no: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Transport-level failures (no HTTP response).
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// HTTP error response captured as bytes (usually non-2xx).
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnavailableDecision {
    pub duration: Duration,
    pub reason: UnavailableReason,
}

const RATE_LIMIT_FALLBACK_SECS: u64 = 30;
const SHORT_COOLDOWN_SECS: u64 = 10;
const AUTH_INVALID_YEARS: u64 = 9_999;

/// Maps an upstream failure to a credential cooldown. Shared across every
/// adapter; a provider only overrides this when its error bodies encode
/// something the status code alone can't (none currently do).
pub fn default_decide_unavailable(failure: &UpstreamFailure) -> Option<UnavailableDecision> {
    match failure {
        UpstreamFailure::Http {
            status, headers, ..
        } => {
            if *status == 404 {
                return None;
            }
            if *status == 429 {
                let duration = parse_retry_after(headers)
                    .unwrap_or_else(|| Duration::from_secs(RATE_LIMIT_FALLBACK_SECS));
                return Some(UnavailableDecision {
                    duration,
                    reason: UnavailableReason::RateLimit,
                });
            }
            if *status == 401 || *status == 403 {
                return Some(UnavailableDecision {
                    duration: auth_invalid_duration(),
                    reason: UnavailableReason::AuthInvalid,
                });
            }
            if (500..600).contains(status) {
                return Some(UnavailableDecision {
                    duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
                    reason: UnavailableReason::Upstream5xx,
                });
            }
            None
        }
        UpstreamFailure::Transport { .. } => Some(UnavailableDecision {
            duration: Duration::from_secs(SHORT_COOLDOWN_SECS),
            reason: UnavailableReason::Timeout,
        }),
    }
}

fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

fn auth_invalid_duration() -> Duration {
    Duration::from_secs(AUTH_INVALID_YEARS * 365 * 24 * 60 * 60)
}

/// The single contract every upstream adapter implements: build/send a
/// chat completion (streaming or not), and list the catalog entries it
/// publishes. Adapters translate the canonical request/response at their
/// boundary; nothing upstream of this trait ever sees provider-specific
/// shapes.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(
        &self,
        ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse>;

    async fn invoke_stream(
        &self,
        ctx: &UpstreamCtx,
        credential: &Credential,
        request: &ChatCompletionRequest,
    ) -> ProviderResult<tokio::sync::mpsc::Receiver<ProviderResult<ChatCompletionChunk>>>;

    async fn list_models(&self, credential: &Credential) -> ProviderResult<Vec<ModelEntry>>;

    /// Classify an upstream failure into a credential "unavailable" decision.
    /// Overridden only when a provider's failure shape needs more than the
    /// status-code table in [`default_decide_unavailable`].
    fn decide_unavailable(&self, failure: &UpstreamFailure) -> Option<UnavailableDecision> {
        default_decide_unavailable(failure)
    }
}

/// Placeholder returned by `invoke`/`invoke_stream` when a credential of the
/// wrong shape reaches an adapter (e.g. a service-account credential handed
/// to an adapter expecting a bearer API key).
pub fn wrong_credential_shape(provider: &'static str) -> ProviderError {
    ProviderError::InvalidConfig(format!("{provider}: unexpected credential shape"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decide_unavailable_maps_rate_limit_with_retry_after() {
        let failure = UpstreamFailure::Http {
            status: 429,
            headers: vec![("retry-after".to_string(), "5".to_string())],
            body: Bytes::new(),
        };
        let decision = default_decide_unavailable(&failure).unwrap();
        assert_eq!(decision.duration, Duration::from_secs(5));
        assert_eq!(decision.reason, UnavailableReason::RateLimit);
    }

    #[test]
    fn decide_unavailable_treats_404_as_permanent_not_a_cooldown() {
        let failure = UpstreamFailure::Http {
            status: 404,
            headers: vec![],
            body: Bytes::new(),
        };
        assert!(default_decide_unavailable(&failure).is_none());
    }

    #[test]
    fn decide_unavailable_maps_5xx_to_short_cooldown() {
        let failure = UpstreamFailure::Http {
            status: 503,
            headers: vec![],
            body: Bytes::new(),
        };
        let decision = default_decide_unavailable(&failure).unwrap();
        assert_eq!(decision.duration, Duration::from_secs(SHORT_COOLDOWN_SECS));
        assert_eq!(decision.reason, UnavailableReason::Upstream5xx);
    }
}
