use std::time::SystemTime;

use gateway_protocol::openai::chat::Usage;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderErrorKind;
use crate::{CredentialId, Headers, UnavailableReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Upstream(UpstreamEvent),
    Operational(OperationalEvent),
}

/// One attempt against one upstream adapter; emitted regardless of outcome
/// and persisted into the usage record's `AttemptTrace`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEvent {
    pub trace_id: Option<String>,
    pub at: SystemTime,
    pub user_id: Option<i64>,
    pub provider: String,
    pub credential_id: Option<CredentialId>,
    pub attempt_no: u32,
    pub request_headers: Headers,
    pub response_status: Option<u16>,
    pub response_headers: Headers,
    pub latency_ms: u64,
    pub usage: Option<Usage>,
    pub error_kind: Option<ProviderErrorKind>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    UnavailableStart(UnavailableStartEvent),
    UnavailableEnd(UnavailableEndEvent),
    CatalogRefreshed(CatalogRefreshedEvent),
}

/// Emitted whenever a gateway's model cache cell is atomically replaced,
/// whether by background revalidation or a forced `Refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRefreshedEvent {
    pub at: SystemTime,
    pub gateway: String,
    pub entry_count: usize,
    /// Set when the fetch failed and this event reports the previous
    /// snapshot being kept in place rather than a successful replacement.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableStartEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
    pub reason: UnavailableReason,
    pub until: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableEndEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
}
