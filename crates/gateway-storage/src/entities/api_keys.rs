use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    /// Salted hash of the token; the only form of the secret looked up by
    /// exact match on every request. Never the plaintext token.
    #[sea_orm(unique_key = "api_key_hash")]
    pub key_hash: String,
    /// Encrypted token ciphertext, for display/rotation flows; absent if the
    /// deployment chose hash-only storage.
    pub key_ciphertext: Option<Vec<u8>>,
    /// Keyring version the ciphertext (if any) was sealed under.
    pub key_version: i32,
    /// One of "live", "test", "staging", "dev"; must agree with the token's
    /// `gw_<env>_` prefix.
    pub environment: String,
    /// Per-resource-pattern scopes, e.g. `{"chat:write": true, "admin": false}`.
    pub scopes_json: Json,
    pub is_primary: bool,
    pub active: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub max_requests: Option<i64>,
    pub request_count: i64,
    pub ip_allowlist_json: Option<Json>,
    pub referrer_allowlist_json: Option<Json>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
