pub mod db;
pub mod entities;
pub mod sea_storage;
pub mod sinks;
pub mod snapshot;
pub mod storage;

pub use sea_storage::SeaOrmStorage;
pub use sinks::DbEventSink;
pub use snapshot::StorageSnapshot;
pub use storage::{
    ApiKeyRow, ChargeOutcome, CreditTransactionRow, NewApiKey, Storage, StorageError,
    StorageResult, TrialRow, UsageAggregate, UsageAggregateFilter, UsageCharge, UserRow,
};
