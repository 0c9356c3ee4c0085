use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Signed, in minor units (cents). Must equal the sum of this user's
    /// credit_transactions.delta; maintained alongside it in one store
    /// transaction, never read from a cache.
    pub credit_balance: i64,
    /// One of "trial", "active", "expired", "none".
    pub subscription_status: String,
    /// Soft-delete flag; a user row is never destroyed.
    pub active: bool,
    pub registered_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub api_keys: HasMany<super::api_keys::Entity>,
    #[sea_orm(has_many)]
    pub usage_records: HasMany<super::usage_records::Entity>,
    #[sea_orm(has_many)]
    pub credit_transactions: HasMany<super::credit_transactions::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
