use gateway_provider_core::ProviderErrorKind;

/// One attempt against one gateway: `None` classification means it
/// succeeded.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub gateway: String,
    pub upstream_model: String,
    pub classification: Option<ProviderErrorKind>,
    pub latency_ms: u64,
}

pub type AttemptTrace = Vec<AttemptRecord>;
