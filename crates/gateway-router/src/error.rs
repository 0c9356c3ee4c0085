use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no model matching {0:?} is available from any gateway")]
    NotFound(String),
    #[error("no credential available for gateway {0}")]
    NoCredential(String),
    #[error("{gateway}: {source}")]
    Upstream {
        gateway: String,
        #[source]
        source: gateway_provider_core::ProviderError,
    },
}
