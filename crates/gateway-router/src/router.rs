use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gateway_catalog::Catalog;
use gateway_common::TimeoutConfig;
use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::Pricing;
use gateway_provider_core::{
    CredentialPool, ProviderError, ProviderErrorKind, ProviderRegistry, ProviderResult,
    UpstreamCtx, UpstreamFailure, UpstreamTransportErrorKind,
};
use tokio::sync::{mpsc, Semaphore};

use crate::error::RouterError;
use crate::resolve::{resolve_candidates, Candidate};
use crate::retry::{self, Action};
use crate::trace::{AttemptRecord, AttemptTrace};

const DEFAULT_MAX_ATTEMPTS: usize = 4;
const DEFAULT_GATEWAY_CONCURRENCY: usize = 64;

/// A request about to go out to one candidate gateway, with correlation
/// metadata the adapter threads through for logging.
pub struct DispatchRequest<'a> {
    pub request: &'a ChatCompletionRequest,
    pub trace_id: Option<String>,
    pub user_id: Option<i64>,
}

/// What succeeded, plus everything accounting needs to bill it and the full
/// attempt trace for observability.
pub struct DispatchOutcome {
    pub response: ChatCompletionResponse,
    pub gateway: String,
    pub upstream_model: String,
    pub pricing: Pricing,
    pub trace: AttemptTrace,
}

/// A stream handed back to the caller once the first chunk has proven the
/// gateway is actually serving; failover only happens before this point.
pub struct StreamOutcome {
    pub gateway: String,
    pub upstream_model: String,
    pub pricing: Pricing,
    pub trace: AttemptTrace,
    pub first_chunk: ProviderResult<ChatCompletionChunk>,
    pub rest: mpsc::Receiver<ProviderResult<ChatCompletionChunk>>,
}

/// Resolves a model name to an ordered candidate list and dispatches across
/// gateways, applying the retry/backoff table and failing credentials over
/// to cooldown on the way. One instance is shared across the process; a
/// `Semaphore` per gateway bounds how many attempts run against it at once.
pub struct Router {
    catalog: Arc<Catalog>,
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialPool>,
    semaphores: HashMap<String, Arc<Semaphore>>,
    max_attempts: usize,
    timeouts: TimeoutConfig,
}

impl Router {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<ProviderRegistry>,
        credentials: Arc<CredentialPool>,
        timeouts: TimeoutConfig,
        per_gateway_concurrency: u32,
        max_attempts: usize,
    ) -> Self {
        let capacity = if per_gateway_concurrency == 0 {
            DEFAULT_GATEWAY_CONCURRENCY
        } else {
            per_gateway_concurrency as usize
        };
        let semaphores = registry
            .names()
            .into_iter()
            .map(|name| (name.to_string(), Arc::new(Semaphore::new(capacity))))
            .collect();
        Self {
            catalog,
            registry,
            credentials,
            semaphores,
            max_attempts: if max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                max_attempts
            },
            timeouts,
        }
    }

    fn effective_model(&self, request: &ChatCompletionRequest) -> String {
        match &request.gateway {
            Some(gateway) if !request.model.contains('/') => format!("{gateway}/{}", request.model),
            _ => request.model.clone(),
        }
    }

    async fn candidates(&self, request: &ChatCompletionRequest) -> Result<Vec<Candidate>, RouterError> {
        let effective_model = self.effective_model(request);
        resolve_candidates(
            &self.catalog,
            self.catalog.gateway_order(),
            &effective_model,
            self.max_attempts,
        )
        .await
    }

    /// Tries to acquire a concurrency slot and credential for one candidate
    /// without spending the attempt budget if either is unavailable.
    async fn acquire_slot(
        &self,
        gateway: &str,
    ) -> Option<(tokio::sync::OwnedSemaphorePermit, gateway_provider_core::CredentialId, gateway_provider_core::Credential)>
    {
        let semaphore = self.semaphores.get(gateway)?.clone();
        let permit = semaphore.try_acquire_owned().ok()?;
        let (credential_id, credential) = self.credentials.acquire(gateway).await.ok()?;
        Some((permit, credential_id, credential))
    }

    pub async fn dispatch(&self, call: DispatchRequest<'_>) -> Result<DispatchOutcome, RouterError> {
        let candidates = self.candidates(call.request).await?;
        let mut trace: AttemptTrace = Vec::new();
        let mut most_informative: Option<(ProviderErrorKind, String)> = None;

        for (candidate_index, candidate) in candidates.iter().enumerate() {
            let mut attempts_on_gateway = 0u32;
            loop {
                let Some((permit, credential_id, credential)) = self.acquire_slot(&candidate.gateway).await
                else {
                    break;
                };
                let Some(provider) = self.registry.get(&candidate.gateway) else {
                    break;
                };

                let mut upstream_request = call.request.clone();
                upstream_request.model = candidate.upstream_model.clone();
                let ctx = UpstreamCtx {
                    trace_id: call.trace_id.clone(),
                    user_id: call.user_id,
                    gateway: candidate.gateway.clone(),
                    credential_id: Some(credential_id),
                    attempt_no: (candidate_index as u32) * 10 + attempts_on_gateway,
                };

                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    self.timeouts.attempt(),
                    provider.invoke(&ctx, &credential, &upstream_request),
                )
                .await;
                drop(permit);
                let latency_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(Ok(response)) => {
                        trace.push(AttemptRecord {
                            gateway: candidate.gateway.clone(),
                            upstream_model: candidate.upstream_model.clone(),
                            classification: None,
                            latency_ms,
                        });
                        return Ok(DispatchOutcome {
                            response,
                            gateway: candidate.gateway.clone(),
                            upstream_model: candidate.upstream_model.clone(),
                            pricing: candidate.pricing.clone(),
                            trace,
                        });
                    }
                    Ok(Err(err)) => {
                        let kind = err.kind();
                        self.handle_failure(&*provider, credential_id, &err).await;
                        trace.push(AttemptRecord {
                            gateway: candidate.gateway.clone(),
                            upstream_model: candidate.upstream_model.clone(),
                            classification: Some(kind),
                            latency_ms,
                        });
                        note_most_informative(&mut most_informative, kind, err.to_string());

                        match retry::decide(kind, attempts_on_gateway, false) {
                            Action::Stop => {
                                return Err(RouterError::Upstream {
                                    gateway: candidate.gateway.clone(),
                                    source: err,
                                });
                            }
                            Action::RetrySame(delay) => {
                                if delay > Duration::ZERO {
                                    tokio::time::sleep(delay).await;
                                }
                                attempts_on_gateway += 1;
                                continue;
                            }
                            Action::NextGateway => break,
                        }
                    }
                    Err(_elapsed) => {
                        trace.push(AttemptRecord {
                            gateway: candidate.gateway.clone(),
                            upstream_model: candidate.upstream_model.clone(),
                            classification: Some(ProviderErrorKind::Timeout),
                            latency_ms,
                        });
                        note_most_informative(
                            &mut most_informative,
                            ProviderErrorKind::Timeout,
                            "attempt deadline exceeded".to_string(),
                        );
                        self.handle_transport_failure(&*provider, credential_id, UpstreamTransportErrorKind::Timeout)
                            .await;
                        match retry::decide(ProviderErrorKind::Timeout, attempts_on_gateway, false) {
                            Action::RetrySame(delay) => {
                                if delay > Duration::ZERO {
                                    tokio::time::sleep(delay).await;
                                }
                                attempts_on_gateway += 1;
                                continue;
                            }
                            _ => break,
                        }
                    }
                }
            }
        }

        Err(match most_informative {
            Some((kind, message)) => RouterError::Upstream {
                gateway: candidates
                    .last()
                    .map(|c| c.gateway.clone())
                    .unwrap_or_default(),
                source: ProviderError::Upstream {
                    kind,
                    message,
                    status: None,
                },
            },
            None => RouterError::NoCredential(
                candidates
                    .first()
                    .map(|c| c.gateway.clone())
                    .unwrap_or_default(),
            ),
        })
    }

    pub async fn dispatch_stream(&self, call: DispatchRequest<'_>) -> Result<StreamOutcome, RouterError> {
        let candidates = self.candidates(call.request).await?;
        let mut trace: AttemptTrace = Vec::new();
        let mut most_informative: Option<(ProviderErrorKind, String)> = None;

        for candidate in &candidates {
            let Some((permit, credential_id, credential)) = self.acquire_slot(&candidate.gateway).await else {
                continue;
            };
            let Some(provider) = self.registry.get(&candidate.gateway) else {
                continue;
            };

            let mut upstream_request = call.request.clone();
            upstream_request.model = candidate.upstream_model.clone();
            let ctx = UpstreamCtx {
                trace_id: call.trace_id.clone(),
                user_id: call.user_id,
                gateway: candidate.gateway.clone(),
                credential_id: Some(credential_id),
                attempt_no: 0,
            };

            let started = Instant::now();
            let stream_result = tokio::time::timeout(
                self.timeouts.attempt(),
                provider.invoke_stream(&ctx, &credential, &upstream_request),
            )
            .await;
            drop(permit);
            let latency_ms = started.elapsed().as_millis() as u64;

            let mut receiver = match stream_result {
                Ok(Ok(receiver)) => receiver,
                Ok(Err(err)) => {
                    let kind = err.kind();
                    self.handle_failure(&*provider, credential_id, &err).await;
                    trace.push(AttemptRecord {
                        gateway: candidate.gateway.clone(),
                        upstream_model: candidate.upstream_model.clone(),
                        classification: Some(kind),
                        latency_ms,
                    });
                    note_most_informative(&mut most_informative, kind, err.to_string());
                    continue;
                }
                Err(_elapsed) => {
                    self.handle_transport_failure(&*provider, credential_id, UpstreamTransportErrorKind::Timeout)
                        .await;
                    trace.push(AttemptRecord {
                        gateway: candidate.gateway.clone(),
                        upstream_model: candidate.upstream_model.clone(),
                        classification: Some(ProviderErrorKind::Timeout),
                        latency_ms,
                    });
                    note_most_informative(
                        &mut most_informative,
                        ProviderErrorKind::Timeout,
                        "attempt deadline exceeded".to_string(),
                    );
                    continue;
                }
            };

            match receiver.recv().await {
                Some(first_chunk) => {
                    trace.push(AttemptRecord {
                        gateway: candidate.gateway.clone(),
                        upstream_model: candidate.upstream_model.clone(),
                        classification: first_chunk.as_ref().err().map(|e| e.kind()),
                        latency_ms,
                    });
                    return Ok(StreamOutcome {
                        gateway: candidate.gateway.clone(),
                        upstream_model: candidate.upstream_model.clone(),
                        pricing: candidate.pricing.clone(),
                        trace,
                        first_chunk,
                        rest: receiver,
                    });
                }
                None => {
                    note_most_informative(
                        &mut most_informative,
                        ProviderErrorKind::Unknown,
                        "stream closed before the first chunk".to_string(),
                    );
                    continue;
                }
            }
        }

        Err(match most_informative {
            Some((kind, message)) => RouterError::Upstream {
                gateway: candidates
                    .last()
                    .map(|c| c.gateway.clone())
                    .unwrap_or_default(),
                source: ProviderError::Upstream {
                    kind,
                    message,
                    status: None,
                },
            },
            None => RouterError::NoCredential(
                candidates
                    .first()
                    .map(|c| c.gateway.clone())
                    .unwrap_or_default(),
            ),
        })
    }

    async fn handle_failure(
        &self,
        provider: &dyn gateway_provider_core::Provider,
        credential_id: gateway_provider_core::CredentialId,
        err: &ProviderError,
    ) {
        let ProviderError::Upstream { status, .. } = err else {
            return;
        };
        let failure = match status {
            Some(status) => UpstreamFailure::Http {
                status: *status,
                headers: vec![],
                body: Bytes::new(),
            },
            None => UpstreamFailure::Transport {
                kind: UpstreamTransportErrorKind::Other,
                message: err.to_string(),
            },
        };
        if let Some(decision) = provider.decide_unavailable(&failure) {
            self.credentials
                .mark_unavailable(credential_id, decision.duration, decision.reason)
                .await;
        }
    }

    async fn handle_transport_failure(
        &self,
        provider: &dyn gateway_provider_core::Provider,
        credential_id: gateway_provider_core::CredentialId,
        kind: UpstreamTransportErrorKind,
    ) {
        let failure = UpstreamFailure::Transport {
            kind,
            message: "attempt deadline exceeded".to_string(),
        };
        if let Some(decision) = provider.decide_unavailable(&failure) {
            self.credentials
                .mark_unavailable(credential_id, decision.duration, decision.reason)
                .await;
        }
    }
}

fn note_most_informative(
    current: &mut Option<(ProviderErrorKind, String)>,
    kind: ProviderErrorKind,
    message: String,
) {
    match current {
        Some((existing_kind, existing_message)) => {
            if retry::most_informative(*existing_kind, kind) == kind {
                *existing_kind = kind;
                *existing_message = message;
            }
        }
        None => *current = Some((kind, message)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use gateway_common::CatalogConfig;
    use gateway_protocol::openai::chat::{
        ChatCompletionChoice, ChatCompletionMessage, MessageRole, Usage,
    };
    use gateway_protocol::openai::models::{Modality, ModelEntry};
    use gateway_provider_core::{ApiKeyCredential, Credential, EventHub};

    use super::*;

    struct ScriptedProvider {
        name: &'static str,
        models: Vec<ModelEntry>,
        responses: StdMutex<VecDeque<ProviderResult<ChatCompletionResponse>>>,
    }

    #[async_trait]
    impl gateway_provider_core::Provider for ScriptedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn invoke(
            &self,
            _ctx: &UpstreamCtx,
            _credential: &Credential,
            request: &ChatCompletionRequest,
        ) -> ProviderResult<ChatCompletionResponse> {
            let queued = self.responses.lock().unwrap().pop_front();
            queued.unwrap_or_else(|| Ok(success_response(&request.model)))
        }

        async fn invoke_stream(
            &self,
            _ctx: &UpstreamCtx,
            _credential: &Credential,
            _request: &ChatCompletionRequest,
        ) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
            unimplemented!("not exercised by these tests")
        }

        async fn list_models(&self, _credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
            Ok(self.models.clone())
        }
    }

    fn success_response(model: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "resp-1".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: model.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage {
                    role: MessageRole::Assistant,
                    content: Some("hi".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                estimated: false,
            },
        }
    }

    fn entry(gateway: &str, upstream_name: &str) -> ModelEntry {
        ModelEntry {
            id: format!("{gateway}/{upstream_name}"),
            object: "model".to_string(),
            source_gateway: gateway.to_string(),
            display_name: upstream_name.to_string(),
            context_length: None,
            pricing: Pricing::default(),
            modality: Modality::default(),
            huggingface: None,
            raw_upstream: None,
        }
    }

    fn sample_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-x".to_string(),
            messages: vec![],
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stream: None,
            n: None,
            tools: None,
            tool_choice: None,
            gateway: None,
        }
    }

    async fn build_router(
        providers: Vec<(&'static str, Vec<ProviderResult<ChatCompletionResponse>>)>,
        priority: Vec<String>,
    ) -> Router {
        let events = EventHub::new(16);
        let credentials = Arc::new(CredentialPool::new(events.clone()));
        let mut registry = ProviderRegistry::new();
        for (index, (name, responses)) in providers.into_iter().enumerate() {
            registry.register(Arc::new(ScriptedProvider {
                name,
                models: vec![entry(name, "gpt-x")],
                responses: StdMutex::new(responses.into()),
            }));
            credentials
                .insert(
                    name,
                    index as i64,
                    Credential::ApiKey(ApiKeyCredential {
                        api_key: "test-key".to_string(),
                    }),
                )
                .await;
        }
        let registry = Arc::new(registry);
        let config = CatalogConfig {
            ttl_s: 300,
            stale_ttl_s: 3600,
            gateway_priority: priority,
        };
        let catalog = Arc::new(Catalog::new(
            registry.clone(),
            credentials.clone(),
            events,
            &config,
        ));
        Router::new(
            catalog,
            registry,
            credentials,
            TimeoutConfig::default(),
            64,
            4,
        )
    }

    #[tokio::test]
    async fn dispatch_succeeds_on_the_first_candidate() {
        let router = build_router(
            vec![("alpha", vec![])],
            vec!["alpha".to_string()],
        )
        .await;
        let request = sample_request();
        let outcome = router
            .dispatch(DispatchRequest {
                request: &request,
                trace_id: None,
                user_id: None,
            })
            .await
            .expect("dispatch succeeds");
        assert_eq!(outcome.gateway, "alpha");
        assert_eq!(outcome.trace.len(), 1);
    }

    #[tokio::test]
    async fn auth_failure_fails_over_to_the_next_gateway() {
        let router = build_router(
            vec![
                (
                    "alpha",
                    vec![Err(ProviderError::Upstream {
                        kind: ProviderErrorKind::Auth,
                        message: "invalid key".to_string(),
                        status: Some(401),
                    })],
                ),
                ("beta", vec![]),
            ],
            vec!["alpha".to_string(), "beta".to_string()],
        )
        .await;
        let request = sample_request();
        let outcome = router
            .dispatch(DispatchRequest {
                request: &request,
                trace_id: None,
                user_id: None,
            })
            .await
            .expect("fails over to beta");
        assert_eq!(outcome.gateway, "beta");
        assert_eq!(outcome.trace.len(), 2);
        assert_eq!(outcome.trace[0].gateway, "alpha");
        assert_eq!(
            outcome.trace[0].classification,
            Some(ProviderErrorKind::Auth)
        );
    }

    #[tokio::test]
    async fn bad_request_stops_without_trying_another_gateway() {
        let router = build_router(
            vec![
                (
                    "alpha",
                    vec![Err(ProviderError::Upstream {
                        kind: ProviderErrorKind::BadRequest,
                        message: "bad params".to_string(),
                        status: Some(400),
                    })],
                ),
                ("beta", vec![]),
            ],
            vec!["alpha".to_string(), "beta".to_string()],
        )
        .await;
        let request = sample_request();
        let err = router
            .dispatch(DispatchRequest {
                request: &request,
                trace_id: None,
                user_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::Upstream { gateway, .. } if gateway == "alpha"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_every_gateway_surfaces_the_most_informative_error() {
        let router = build_router(
            vec![
                (
                    "alpha",
                    vec![
                        Err(ProviderError::Upstream {
                            kind: ProviderErrorKind::Network,
                            message: "connect reset".to_string(),
                            status: None,
                        }),
                        Err(ProviderError::Upstream {
                            kind: ProviderErrorKind::Network,
                            message: "connect reset".to_string(),
                            status: None,
                        }),
                    ],
                ),
                (
                    "beta",
                    vec![
                        Err(ProviderError::Upstream {
                            kind: ProviderErrorKind::RateLimited,
                            message: "slow down".to_string(),
                            status: Some(429),
                        }),
                        Err(ProviderError::Upstream {
                            kind: ProviderErrorKind::RateLimited,
                            message: "slow down".to_string(),
                            status: Some(429),
                        }),
                        Err(ProviderError::Upstream {
                            kind: ProviderErrorKind::RateLimited,
                            message: "slow down".to_string(),
                            status: Some(429),
                        }),
                    ],
                ),
            ],
            vec!["alpha".to_string(), "beta".to_string()],
        )
        .await;
        let request = sample_request();
        let err = router
            .dispatch(DispatchRequest {
                request: &request,
                trace_id: None,
                user_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::Upstream { source, .. }
                if source.kind() == ProviderErrorKind::RateLimited
        ));
    }
}
