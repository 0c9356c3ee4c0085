use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Classification of an upstream failure, assigned by the adapter that saw
/// it. The router aggregates these across attempts; the HTTP layer maps the
/// final one to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    NotFound,
    RateLimited,
    BadRequest,
    Upstream5xx,
    Timeout,
    Network,
    ContentFilter,
    ContextTooLong,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            429 => ProviderErrorKind::RateLimited,
            400 | 422 => ProviderErrorKind::BadRequest,
            500..=599 => ProviderErrorKind::Upstream5xx,
            _ => ProviderErrorKind::Unknown,
        }
    }

    /// Whether the router should attempt the next gateway for this kind of
    /// failure rather than surface it directly.
    pub fn is_failover_eligible(&self) -> bool {
        !matches!(
            self,
            ProviderErrorKind::BadRequest
                | ProviderErrorKind::ContentFilter
                | ProviderErrorKind::ContextTooLong
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("missing credential field: {0}")]
    MissingCredentialField(&'static str),
    #[error("{kind:?}: {message}")]
    Upstream {
        kind: ProviderErrorKind,
        message: String,
        status: Option<u16>,
    },
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Upstream { kind, .. } => *kind,
            _ => ProviderErrorKind::Unknown,
        }
    }
}
