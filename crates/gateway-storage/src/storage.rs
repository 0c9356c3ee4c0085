use async_trait::async_trait;
use time::OffsetDateTime;

use gateway_common::GlobalConfig;
use gateway_provider_core::Event;

use crate::snapshot::{GlobalConfigRow, StorageSnapshot};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("api key not found")]
    ApiKeyNotFound,
    #[error("user not found: {0}")]
    UserNotFound(i64),
    #[error("coupon not found: {0}")]
    CouponNotFound(String),
    #[error("coupon already fully redeemed: {0}")]
    CouponExhausted(String),
    #[error("coupon expired: {0}")]
    CouponExpired(String),
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: i64,
    pub key_hash: String,
    pub key_ciphertext: Option<Vec<u8>>,
    pub key_version: i32,
    pub environment: String,
    pub scopes_json: serde_json::Value,
    pub is_primary: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub max_requests: Option<i64>,
    pub ip_allowlist_json: Option<serde_json::Value>,
    pub referrer_allowlist_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub environment: String,
    pub scopes_json: serde_json::Value,
    pub is_primary: bool,
    pub active: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub max_requests: Option<i64>,
    pub request_count: i64,
    pub ip_allowlist_json: Option<serde_json::Value>,
    pub referrer_allowlist_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub credit_balance: i64,
    pub subscription_status: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct TrialRow {
    pub id: i64,
    pub user_id: i64,
    pub starts_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
    pub credits_remaining: i64,
    pub tokens_remaining: i64,
    pub requests_remaining: i64,
}

/// What the router/accounting layer learned about one completed request.
/// Storage decides, atomically, how much of it is trial-covered vs billed.
#[derive(Debug, Clone)]
pub struct UsageCharge {
    pub user_id: i64,
    pub api_key_id: Option<i64>,
    pub model: String,
    pub gateway: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    /// Minor units; pre-computed by the accounting layer from catalog pricing.
    pub cost: i64,
    pub cost_unknown: bool,
    pub latency_ms: i64,
    pub outcome: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub usage_record_id: i64,
    pub new_balance: i64,
    /// Trial credits/tokens/requests consumed by this charge, if a trial was active.
    pub trial_consumed: Option<i64>,
    pub trial_just_exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct UsageAggregateFilter {
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub user_id: Option<i64>,
    pub gateway: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageAggregate {
    pub matched_rows: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost: i64,
}

#[derive(Debug, Clone)]
pub struct CreditTransactionRow {
    pub id: i64,
    pub user_id: i64,
    pub delta: i64,
    pub reason: String,
    pub correlation_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Storage is used for:
/// - bootstrap (`load_snapshot`): provider/credential registry, loaded once
/// - the gate and accounting paths, which read and write live (no caching,
///   spec requires a fresh balance/trial read on every charge)
/// - admin mutations
/// - event persistence (`append_event`)
///
/// Catalog and provider/credential config, once loaded at bootstrap, are
/// never re-read from the store on the request path, those live in the
/// in-memory snapshots owned by `gateway-catalog` and `gateway-provider-core`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Enabled by default at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    // Providers (catalog-adjacent registry rows, admin-managed)
    async fn upsert_provider(
        &self,
        name: &str,
        config_json: &serde_json::Value,
        enabled: bool,
    ) -> StorageResult<i64>;
    async fn delete_provider(&self, name: &str) -> StorageResult<()>;

    // Credentials (upstream provider secrets)
    async fn insert_credential(
        &self,
        provider_name: &str,
        name: Option<&str>,
        settings_json: &serde_json::Value,
        secret_json: &serde_json::Value,
        enabled: bool,
    ) -> StorageResult<i64>;
    async fn update_credential(
        &self,
        credential_id: i64,
        name: Option<&str>,
        settings_json: &serde_json::Value,
        secret_json: &serde_json::Value,
    ) -> StorageResult<()>;
    async fn set_credential_enabled(&self, credential_id: i64, enabled: bool) -> StorageResult<()>;
    async fn delete_credential(&self, credential_id: i64) -> StorageResult<()>;

    // Users
    async fn create_user(&self) -> StorageResult<i64>;
    async fn get_user(&self, user_id: i64) -> StorageResult<Option<UserRow>>;
    async fn set_user_active(&self, user_id: i64, active: bool) -> StorageResult<()>;
    async fn set_user_subscription_status(
        &self,
        user_id: i64,
        status: &str,
    ) -> StorageResult<()>;

    // API keys: gate-path auth
    async fn insert_api_key(&self, input: NewApiKey) -> StorageResult<i64>;
    /// Exact-match lookup by salted hash; the gate's only per-request read
    /// against this table. Bumps neither `last_used_at` nor `request_count`
    /// (callers commit those via `touch_api_key` after admission succeeds).
    async fn find_api_key_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKeyRow>>;
    async fn touch_api_key(&self, api_key_id: i64) -> StorageResult<()>;
    async fn set_api_key_active(&self, api_key_id: i64, active: bool) -> StorageResult<()>;
    async fn delete_api_key(&self, api_key_id: i64) -> StorageResult<()>;
    async fn list_api_keys(&self, user_id: i64) -> StorageResult<Vec<ApiKeyRow>>;

    // Trials
    async fn get_active_trial(&self, user_id: i64) -> StorageResult<Option<TrialRow>>;
    async fn grant_trial(
        &self,
        user_id: i64,
        starts_at: OffsetDateTime,
        ends_at: OffsetDateTime,
        credits: i64,
        tokens: i64,
        requests: i64,
    ) -> StorageResult<i64>;

    /// Admit-time reservation: decrements `requests_remaining` by one without
    /// touching credits/tokens, which are only known post-billing. Returns
    /// `false` if the trial has no request slots left.
    async fn reserve_trial_request(&self, trial_id: i64) -> StorageResult<bool>;

    /// Undoes a reservation from `reserve_trial_request` when the request
    /// that reserved it never actually ran (gate rejected it at a later
    /// step, or the caller disconnected before dispatch).
    async fn release_trial_request(&self, trial_id: i64) -> StorageResult<()>;

    // Usage accounting: the one atomic read-charge-record operation
    async fn charge_usage(&self, charge: UsageCharge) -> StorageResult<ChargeOutcome>;

    async fn aggregate_usage(&self, filter: UsageAggregateFilter) -> StorageResult<UsageAggregate>;

    /// Most-recent-first ledger for one user; backs the user-facing
    /// transaction history endpoint.
    async fn list_credit_transactions(
        &self,
        user_id: i64,
        limit: u64,
        offset: u64,
    ) -> StorageResult<Vec<CreditTransactionRow>>;

    /// Out-of-band balance adjustment (admin grant, refund) not tied to a
    /// usage record or coupon redemption. Reason is caller-supplied, e.g.
    /// "purchase" or "refund".
    async fn grant_credits(
        &self,
        user_id: i64,
        amount: i64,
        reason: &str,
        correlation_id: Option<String>,
    ) -> StorageResult<i64>;

    // Coupons / referrals
    async fn create_coupon(
        &self,
        code: &str,
        credit_amount: i64,
        max_redemptions: i32,
        expires_at: Option<OffsetDateTime>,
    ) -> StorageResult<i64>;
    async fn redeem_coupon(&self, code: &str, user_id: i64) -> StorageResult<i64>;
    async fn create_referral(
        &self,
        referrer_user_id: i64,
        referred_user_id: i64,
    ) -> StorageResult<i64>;
    /// Transactionally marks the referral rewarded and credits both parties.
    async fn reward_referral(
        &self,
        referral_id: i64,
        referrer_amount: i64,
        referred_amount: i64,
    ) -> StorageResult<()>;

    // Sessions / turns (chat history, not central to the core)
    async fn create_session(&self, user_id: i64) -> StorageResult<i64>;
    async fn append_turn(&self, session_id: i64, role: &str, content: &str) -> StorageResult<i64>;

    async fn append_event(&self, event: &Event) -> StorageResult<()>;
}
