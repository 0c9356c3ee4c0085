#[derive(Debug, thiserror::Error)]
pub enum AccountingError {
    #[error(transparent)]
    Storage(#[from] gateway_storage::StorageError),
}
