use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub api_key_id: Option<i64>,
    pub model: String,
    /// The gateway that ultimately served the request, not the first attempt.
    pub gateway: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    /// Minor units; 0 when `cost_unknown`.
    pub cost: i64,
    /// Set when the serving catalog entry had null pricing.
    pub cost_unknown: bool,
    pub latency_ms: i64,
    /// One of "ok", "error", "timeout", "rejected".
    pub outcome: String,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
    #[sea_orm(belongs_to, from = "api_key_id", to = "id", on_delete = "SetNull")]
    pub api_key: HasOne<super::api_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
