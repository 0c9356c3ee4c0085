/// Classification surfaced by `Admit`; the HTTP layer maps each variant to a
/// stable status code and `code` string.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error("trial exhausted")]
    TrialExhausted,
    #[error(transparent)]
    Storage(#[from] gateway_storage::StorageError),
}
