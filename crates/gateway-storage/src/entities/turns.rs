use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "turns")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    /// One of "user", "assistant", "system", "tool".
    pub role: String,
    pub content: String,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "session_id", to = "id", on_delete = "Cascade")]
    pub session: HasOne<super::sessions::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
