use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Append-only. A row is never updated or deleted once written; a refund is
/// a new row with an opposite-signed delta, not a mutation of the original.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credit_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    /// Signed, minor units. Positive credits the account, negative debits it.
    pub delta: i64,
    /// One of "purchase", "deduction", "refund", "referral", "coupon", "trial_grant".
    pub reason: String,
    /// Model request id, payment id, coupon code, referral id, etc.
    pub correlation_id: Option<String>,
    pub metadata_json: Option<Json>,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
