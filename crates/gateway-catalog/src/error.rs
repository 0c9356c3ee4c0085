use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown gateway: {0}")]
    UnknownGateway(String),
    #[error("no active credential available to fetch catalog for gateway {0}")]
    NoCredential(String),
    #[error("catalog fetch for gateway {gateway} failed: {source}")]
    Upstream {
        gateway: String,
        #[source]
        source: gateway_provider_core::ProviderError,
    },
}

pub type CatalogResult<T> = Result<T, CatalogError>;
