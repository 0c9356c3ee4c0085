//! Core provider abstractions shared by every upstream adapter.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Provider implementations construct `UpstreamHttpRequest` values;
//! a higher layer (`gateway-provider-impl`'s HTTP client) performs IO.

pub mod config;
pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod vertex_auth;

pub use config::{
    DeepInfraConfig, HuggingFaceConfig, ModelRecord, ModelTable, OpenAICompatibleConfig,
    OpenRouterConfig, PortkeyConfig, ProviderConfig, StaticCatalogConfig, VertexConfig,
};
pub use credential::{
    AcquireError, ApiKeyCredential, Credential, CredentialId, CredentialPool, CredentialState,
    ServiceAccountCredential, UnavailableReason,
};
pub use errors::{ProviderError, ProviderErrorKind, ProviderResult};
pub use events::{
    CatalogRefreshedEvent, Event, EventHub, EventSink, OperationalEvent, TerminalEventSink,
    UnavailableEndEvent, UnavailableStartEvent, UpstreamEvent,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use provider::{
    HttpMethod, Provider, UnavailableDecision, UpstreamBody, UpstreamCtx, UpstreamFailure,
    UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportErrorKind,
    default_decide_unavailable,
};
pub use registry::ProviderRegistry;
