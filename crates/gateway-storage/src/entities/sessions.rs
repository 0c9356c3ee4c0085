use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Optional chat-history container; not central to the routing/accounting
/// core, referenced by a subset of HTTP Surface endpoints only.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
    #[sea_orm(has_many)]
    pub turns: HasMany<super::turns::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
