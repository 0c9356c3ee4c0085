#![allow(clippy::needless_update)]

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    EntityTrait, FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Schema, TransactionTrait,
};
use time::OffsetDateTime;

use gateway_common::GlobalConfig;
use gateway_provider_core::{Event, OperationalEvent};

use crate::entities;
use crate::snapshot::{CredentialRow, GlobalConfigRow, ProviderRow, StorageSnapshot};
use crate::storage::{
    ApiKeyRow, ChargeOutcome, CreditTransactionRow, NewApiKey, Storage, StorageError,
    StorageResult, TrialRow, UsageAggregate, UsageAggregateFilter, UsageCharge, UserRow,
};

#[derive(Debug, FromQueryResult, Default)]
struct UsageAggregateRow {
    matched_rows: Option<i64>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    cost: Option<i64>,
}

/// sea-orm-backed `Storage`. One pooled `DatabaseConnection`, cheap to clone.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait::async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Providers)
            .register(entities::Credentials)
            .register(entities::Users)
            .register(entities::ApiKeys)
            .register(entities::CreditTransactions)
            .register(entities::UsageRecords)
            .register(entities::Trials)
            .register(entities::Coupons)
            .register(entities::Referrals)
            .register(entities::Sessions)
            .register(entities::Turns)
            .register(entities::InternalEvents)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        let Some(model) = row else {
            return Ok(None);
        };
        let config: GlobalConfig = serde_json::from_value(model.config_json)?;
        Ok(Some(GlobalConfigRow {
            id: model.id,
            config,
            updated_at: model.updated_at,
        }))
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::Column;

        let now = OffsetDateTime::now_utc();
        let id = 1_i64;
        let config_json = serde_json::to_value(config)?;

        let active = entities::global_config::ActiveModel {
            id: ActiveValue::Set(id),
            config_json: ActiveValue::Set(config_json),
            updated_at: ActiveValue::Set(now),
        };

        entities::GlobalConfig::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::ConfigJson, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let global_config = self.load_global_config().await?;

        let providers = entities::Providers::find().all(&self.db).await?;
        let providers = providers
            .into_iter()
            .map(|m| ProviderRow {
                id: m.id,
                name: m.name,
                config_json: m.config_json,
                enabled: m.enabled,
                updated_at: m.updated_at,
            })
            .collect();

        let credentials = entities::Credentials::find().all(&self.db).await?;
        let credentials = credentials
            .into_iter()
            .map(|m| CredentialRow {
                id: m.id,
                provider_id: m.provider_id,
                name: m.name,
                settings_json: m.settings.unwrap_or_else(|| serde_json::json!({})),
                secret_json: m.secret,
                enabled: m.enabled,
                created_at: m.created_at,
                updated_at: m.updated_at,
            })
            .collect();

        Ok(StorageSnapshot {
            global_config,
            providers,
            credentials,
        })
    }

    async fn upsert_provider(
        &self,
        name: &str,
        config_json: &serde_json::Value,
        enabled: bool,
    ) -> StorageResult<i64> {
        use entities::providers::Column;

        let now = OffsetDateTime::now_utc();
        let existing = entities::Providers::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;

        let id = match existing {
            Some(model) => {
                let mut active: entities::providers::ActiveModel = model.into();
                active.config_json = ActiveValue::Set(config_json.clone());
                active.enabled = ActiveValue::Set(enabled);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?.id
            }
            None => {
                let active = entities::providers::ActiveModel {
                    id: ActiveValue::NotSet,
                    name: ActiveValue::Set(name.to_string()),
                    config_json: ActiveValue::Set(config_json.clone()),
                    enabled: ActiveValue::Set(enabled),
                    updated_at: ActiveValue::Set(now),
                };
                entities::Providers::insert(active)
                    .exec(&self.db)
                    .await?
                    .last_insert_id
            }
        };
        Ok(id)
    }

    async fn delete_provider(&self, name: &str) -> StorageResult<()> {
        use entities::providers::Column;

        let Some(provider) = entities::Providers::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        entities::Providers::delete_by_id(provider.id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_credential(
        &self,
        provider_name: &str,
        name: Option<&str>,
        settings_json: &serde_json::Value,
        secret_json: &serde_json::Value,
        enabled: bool,
    ) -> StorageResult<i64> {
        use entities::providers::Column as ProviderColumn;

        let provider = entities::Providers::find()
            .filter(ProviderColumn::Name.eq(provider_name))
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                StorageError::Db(sea_orm::DbErr::RecordNotFound(format!(
                    "provider not found: {provider_name}"
                )))
            })?;

        let now = OffsetDateTime::now_utc();
        let active = entities::credentials::ActiveModel {
            id: ActiveValue::NotSet,
            provider_id: ActiveValue::Set(provider.id),
            name: ActiveValue::Set(name.map(str::to_string)),
            settings: ActiveValue::Set(Some(settings_json.clone())),
            secret: ActiveValue::Set(secret_json.clone()),
            enabled: ActiveValue::Set(enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Credentials::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn update_credential(
        &self,
        credential_id: i64,
        name: Option<&str>,
        settings_json: &serde_json::Value,
        secret_json: &serde_json::Value,
    ) -> StorageResult<()> {
        let Some(model) = entities::Credentials::find_by_id(credential_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc();
        let mut active: entities::credentials::ActiveModel = model.into();
        active.name = ActiveValue::Set(name.map(str::to_string));
        active.settings = ActiveValue::Set(Some(settings_json.clone()));
        active.secret = ActiveValue::Set(secret_json.clone());
        active.updated_at = ActiveValue::Set(now);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn set_credential_enabled(&self, credential_id: i64, enabled: bool) -> StorageResult<()> {
        let Some(model) = entities::Credentials::find_by_id(credential_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc();
        let mut active: entities::credentials::ActiveModel = model.into();
        active.enabled = ActiveValue::Set(enabled);
        active.updated_at = ActiveValue::Set(now);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn delete_credential(&self, credential_id: i64) -> StorageResult<()> {
        entities::Credentials::delete_by_id(credential_id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn create_user(&self) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::users::ActiveModel {
            id: ActiveValue::NotSet,
            credit_balance: ActiveValue::Set(0),
            subscription_status: ActiveValue::Set("none".to_string()),
            active: ActiveValue::Set(true),
            registered_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Users::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn get_user(&self, user_id: i64) -> StorageResult<Option<UserRow>> {
        let model = entities::Users::find_by_id(user_id).one(&self.db).await?;
        Ok(model.map(|m| UserRow {
            id: m.id,
            credit_balance: m.credit_balance,
            subscription_status: m.subscription_status,
            active: m.active,
        }))
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> StorageResult<()> {
        let Some(model) = entities::Users::find_by_id(user_id).one(&self.db).await? else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc();
        let mut model_active: entities::users::ActiveModel = model.into();
        model_active.active = ActiveValue::Set(active);
        model_active.updated_at = ActiveValue::Set(now);
        model_active.update(&self.db).await?;
        Ok(())
    }

    async fn set_user_subscription_status(&self, user_id: i64, status: &str) -> StorageResult<()> {
        let Some(model) = entities::Users::find_by_id(user_id).one(&self.db).await? else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc();
        let mut active: entities::users::ActiveModel = model.into();
        active.subscription_status = ActiveValue::Set(status.to_string());
        active.updated_at = ActiveValue::Set(now);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn insert_api_key(&self, input: NewApiKey) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::api_keys::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(input.user_id),
            key_hash: ActiveValue::Set(input.key_hash),
            key_ciphertext: ActiveValue::Set(input.key_ciphertext),
            key_version: ActiveValue::Set(input.key_version),
            environment: ActiveValue::Set(input.environment),
            scopes_json: ActiveValue::Set(input.scopes_json),
            is_primary: ActiveValue::Set(input.is_primary),
            active: ActiveValue::Set(true),
            expires_at: ActiveValue::Set(input.expires_at),
            max_requests: ActiveValue::Set(input.max_requests),
            request_count: ActiveValue::Set(0),
            ip_allowlist_json: ActiveValue::Set(input.ip_allowlist_json),
            referrer_allowlist_json: ActiveValue::Set(input.referrer_allowlist_json),
            created_at: ActiveValue::Set(now),
            last_used_at: ActiveValue::Set(None),
        };
        let inserted = entities::ApiKeys::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKeyRow>> {
        use entities::api_keys::Column;
        let model = entities::ApiKeys::find()
            .filter(Column::KeyHash.eq(key_hash))
            .one(&self.db)
            .await?;
        Ok(model.map(|m| ApiKeyRow {
            id: m.id,
            user_id: m.user_id,
            environment: m.environment,
            scopes_json: m.scopes_json,
            is_primary: m.is_primary,
            active: m.active,
            expires_at: m.expires_at,
            max_requests: m.max_requests,
            request_count: m.request_count,
            ip_allowlist_json: m.ip_allowlist_json,
            referrer_allowlist_json: m.referrer_allowlist_json,
        }))
    }

    async fn touch_api_key(&self, api_key_id: i64) -> StorageResult<()> {
        let Some(model) = entities::ApiKeys::find_by_id(api_key_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc();
        let request_count = model.request_count + 1;
        let mut active: entities::api_keys::ActiveModel = model.into();
        active.last_used_at = ActiveValue::Set(Some(now));
        active.request_count = ActiveValue::Set(request_count);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn set_api_key_active(&self, api_key_id: i64, active: bool) -> StorageResult<()> {
        let Some(model) = entities::ApiKeys::find_by_id(api_key_id)
            .one(&self.db)
            .await?
        else {
            return Ok(());
        };
        let mut model_active: entities::api_keys::ActiveModel = model.into();
        model_active.active = ActiveValue::Set(active);
        model_active.update(&self.db).await?;
        Ok(())
    }

    async fn delete_api_key(&self, api_key_id: i64) -> StorageResult<()> {
        entities::ApiKeys::delete_by_id(api_key_id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn list_api_keys(&self, user_id: i64) -> StorageResult<Vec<ApiKeyRow>> {
        use entities::api_keys::Column;
        let models = entities::ApiKeys::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(models
            .into_iter()
            .map(|m| ApiKeyRow {
                id: m.id,
                user_id: m.user_id,
                environment: m.environment,
                scopes_json: m.scopes_json,
                is_primary: m.is_primary,
                active: m.active,
                expires_at: m.expires_at,
                max_requests: m.max_requests,
                request_count: m.request_count,
                ip_allowlist_json: m.ip_allowlist_json,
                referrer_allowlist_json: m.referrer_allowlist_json,
            })
            .collect())
    }

    async fn get_active_trial(&self, user_id: i64) -> StorageResult<Option<TrialRow>> {
        use entities::trials::Column;
        let now = OffsetDateTime::now_utc();
        let model = entities::Trials::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::EndsAt.gt(now))
            .one(&self.db)
            .await?;
        Ok(model.map(|m| TrialRow {
            id: m.id,
            user_id: m.user_id,
            starts_at: m.starts_at,
            ends_at: m.ends_at,
            credits_remaining: m.credits_remaining,
            tokens_remaining: m.tokens_remaining,
            requests_remaining: m.requests_remaining,
        }))
    }

    async fn grant_trial(
        &self,
        user_id: i64,
        starts_at: OffsetDateTime,
        ends_at: OffsetDateTime,
        credits: i64,
        tokens: i64,
        requests: i64,
    ) -> StorageResult<i64> {
        let active = entities::trials::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            starts_at: ActiveValue::Set(starts_at),
            ends_at: ActiveValue::Set(ends_at),
            credits_remaining: ActiveValue::Set(credits),
            tokens_remaining: ActiveValue::Set(tokens),
            requests_remaining: ActiveValue::Set(requests),
        };
        let inserted = entities::Trials::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn reserve_trial_request(&self, trial_id: i64) -> StorageResult<bool> {
        let Some(model) = entities::Trials::find_by_id(trial_id).one(&self.db).await? else {
            return Ok(false);
        };
        if model.requests_remaining <= 0 {
            return Ok(false);
        }
        let remaining = model.requests_remaining - 1;
        let mut active: entities::trials::ActiveModel = model.into();
        active.requests_remaining = ActiveValue::Set(remaining);
        active.update(&self.db).await?;
        Ok(true)
    }

    async fn release_trial_request(&self, trial_id: i64) -> StorageResult<()> {
        let Some(model) = entities::Trials::find_by_id(trial_id).one(&self.db).await? else {
            return Ok(());
        };
        let remaining = model.requests_remaining + 1;
        let mut active: entities::trials::ActiveModel = model.into();
        active.requests_remaining = ActiveValue::Set(remaining);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn charge_usage(&self, charge: UsageCharge) -> StorageResult<ChargeOutcome> {
        let result = self
            .db
            .transaction::<_, ChargeOutcome, StorageError>(|txn| {
                Box::pin(async move {
                    let user = entities::Users::find_by_id(charge.user_id)
                        .one(txn)
                        .await?
                        .ok_or(StorageError::UserNotFound(charge.user_id))?;

                    let now = OffsetDateTime::now_utc();
                    let trial = entities::Trials::find()
                        .filter(entities::trials::Column::UserId.eq(charge.user_id))
                        .filter(entities::trials::Column::EndsAt.gt(now))
                        .one(txn)
                        .await?;

                    let mut new_balance = user.credit_balance;
                    let mut trial_consumed = None;
                    let mut trial_just_exhausted = false;

                    if let Some(trial_row) = trial.filter(|t| t.credits_remaining > 0) {
                        let covered = charge.cost.min(trial_row.credits_remaining);
                        let remainder = charge.cost - covered;
                        trial_consumed = Some(covered);

                        let remaining_after = trial_row.credits_remaining - covered;
                        let tokens_used = charge.prompt_tokens + charge.completion_tokens;
                        let tokens_after = (trial_row.tokens_remaining - tokens_used).max(0);
                        let mut trial_active: entities::trials::ActiveModel = trial_row.into();
                        trial_active.credits_remaining = ActiveValue::Set(remaining_after);
                        trial_active.tokens_remaining = ActiveValue::Set(tokens_after);
                        trial_active.update(txn).await?;

                        if remainder > 0 {
                            record_deduction(
                                txn,
                                charge.user_id,
                                -remainder,
                                charge.correlation_id.clone(),
                                now,
                            )
                            .await?;
                            new_balance = user.credit_balance - remainder;
                            trial_just_exhausted = true;
                        }
                    } else if charge.cost != 0 {
                        record_deduction(
                            txn,
                            charge.user_id,
                            -charge.cost,
                            charge.correlation_id.clone(),
                            now,
                        )
                        .await?;
                        new_balance = user.credit_balance - charge.cost;
                    }

                    if new_balance != user.credit_balance {
                        let mut user_active: entities::users::ActiveModel = user.into();
                        user_active.credit_balance = ActiveValue::Set(new_balance);
                        user_active.updated_at = ActiveValue::Set(now);
                        user_active.update(txn).await?;
                    }

                    let usage_active = entities::usage_records::ActiveModel {
                        id: ActiveValue::NotSet,
                        user_id: ActiveValue::Set(charge.user_id),
                        api_key_id: ActiveValue::Set(charge.api_key_id),
                        model: ActiveValue::Set(charge.model.clone()),
                        gateway: ActiveValue::Set(charge.gateway.clone()),
                        prompt_tokens: ActiveValue::Set(charge.prompt_tokens),
                        completion_tokens: ActiveValue::Set(charge.completion_tokens),
                        cost: ActiveValue::Set(charge.cost),
                        cost_unknown: ActiveValue::Set(charge.cost_unknown),
                        latency_ms: ActiveValue::Set(charge.latency_ms),
                        outcome: ActiveValue::Set(charge.outcome.clone()),
                        created_at: ActiveValue::Set(now),
                    };
                    let inserted = entities::UsageRecords::insert(usage_active)
                        .exec(txn)
                        .await?;

                    Ok(ChargeOutcome {
                        usage_record_id: inserted.last_insert_id,
                        new_balance,
                        trial_consumed,
                        trial_just_exhausted,
                    })
                })
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(sea_orm::TransactionError::Connection(err)) => Err(StorageError::Db(err)),
            Err(sea_orm::TransactionError::Transaction(err)) => Err(err),
        }
    }

    async fn aggregate_usage(&self, filter: UsageAggregateFilter) -> StorageResult<UsageAggregate> {
        use entities::usage_records::Column;

        let mut query = entities::UsageRecords::find()
            .select_only()
            .column_as(Expr::col(Column::Id).count(), "matched_rows")
            .column_as(Expr::col(Column::PromptTokens).sum(), "prompt_tokens")
            .column_as(Expr::col(Column::CompletionTokens).sum(), "completion_tokens")
            .column_as(Expr::col(Column::Cost).sum(), "cost")
            .filter(Column::CreatedAt.gte(filter.from))
            .filter(Column::CreatedAt.lte(filter.to));

        if let Some(user_id) = filter.user_id {
            query = query.filter(Column::UserId.eq(user_id));
        }
        if let Some(gateway) = filter.gateway.as_deref() {
            query = query.filter(Column::Gateway.eq(gateway));
        }
        if let Some(model) = filter.model.as_deref() {
            query = query.filter(Column::Model.eq(model));
        }

        let row = query
            .into_model::<UsageAggregateRow>()
            .one(&self.db)
            .await?
            .unwrap_or_default();

        Ok(UsageAggregate {
            matched_rows: row.matched_rows.unwrap_or(0),
            prompt_tokens: row.prompt_tokens.unwrap_or(0),
            completion_tokens: row.completion_tokens.unwrap_or(0),
            cost: row.cost.unwrap_or(0),
        })
    }

    async fn list_credit_transactions(
        &self,
        user_id: i64,
        limit: u64,
        offset: u64,
    ) -> StorageResult<Vec<CreditTransactionRow>> {
        use entities::credit_transactions::Column;
        let models = entities::CreditTransactions::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?;
        Ok(models
            .into_iter()
            .map(|m| CreditTransactionRow {
                id: m.id,
                user_id: m.user_id,
                delta: m.delta,
                reason: m.reason,
                correlation_id: m.correlation_id,
                created_at: m.created_at,
            })
            .collect())
    }

    async fn grant_credits(
        &self,
        user_id: i64,
        amount: i64,
        reason: &str,
        correlation_id: Option<String>,
    ) -> StorageResult<i64> {
        let reason = reason.to_string();
        let result = self
            .db
            .transaction::<_, i64, StorageError>(|txn| {
                Box::pin(async move {
                    let user = entities::Users::find_by_id(user_id)
                        .one(txn)
                        .await?
                        .ok_or(StorageError::UserNotFound(user_id))?;
                    let now = OffsetDateTime::now_utc();
                    let new_balance = user.credit_balance + amount;
                    let mut user_active: entities::users::ActiveModel = user.into();
                    user_active.credit_balance = ActiveValue::Set(new_balance);
                    user_active.updated_at = ActiveValue::Set(now);
                    user_active.update(txn).await?;

                    let tx_active = entities::credit_transactions::ActiveModel {
                        id: ActiveValue::NotSet,
                        user_id: ActiveValue::Set(user_id),
                        delta: ActiveValue::Set(amount),
                        reason: ActiveValue::Set(reason.clone()),
                        correlation_id: ActiveValue::Set(correlation_id.clone()),
                        metadata_json: ActiveValue::Set(None),
                        created_at: ActiveValue::Set(now),
                    };
                    let inserted = entities::CreditTransactions::insert(tx_active)
                        .exec(txn)
                        .await?;
                    Ok(inserted.last_insert_id)
                })
            })
            .await;

        match result {
            Ok(id) => Ok(id),
            Err(sea_orm::TransactionError::Connection(err)) => Err(StorageError::Db(err)),
            Err(sea_orm::TransactionError::Transaction(err)) => Err(err),
        }
    }

    async fn create_coupon(
        &self,
        code: &str,
        credit_amount: i64,
        max_redemptions: i32,
        expires_at: Option<OffsetDateTime>,
    ) -> StorageResult<i64> {
        let active = entities::coupons::ActiveModel {
            id: ActiveValue::NotSet,
            code: ActiveValue::Set(code.to_string()),
            credit_amount: ActiveValue::Set(credit_amount),
            max_redemptions: ActiveValue::Set(max_redemptions),
            redeemed_count: ActiveValue::Set(0),
            expires_at: ActiveValue::Set(expires_at),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = entities::Coupons::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn redeem_coupon(&self, code: &str, user_id: i64) -> StorageResult<i64> {
        let code = code.to_string();
        let result = self
            .db
            .transaction::<_, i64, StorageError>(|txn| {
                Box::pin(async move {
                    use entities::coupons::Column;
                    let coupon = entities::Coupons::find()
                        .filter(Column::Code.eq(code.as_str()))
                        .one(txn)
                        .await?
                        .ok_or_else(|| StorageError::CouponNotFound(code.clone()))?;

                    if let Some(expires_at) = coupon.expires_at
                        && expires_at <= OffsetDateTime::now_utc()
                    {
                        return Err(StorageError::CouponExpired(code.clone()));
                    }
                    if coupon.redeemed_count >= coupon.max_redemptions {
                        return Err(StorageError::CouponExhausted(code.clone()));
                    }

                    let now = OffsetDateTime::now_utc();
                    let credit_amount = coupon.credit_amount;
                    let redeemed_count = coupon.redeemed_count + 1;
                    let mut coupon_active: entities::coupons::ActiveModel = coupon.into();
                    coupon_active.redeemed_count = ActiveValue::Set(redeemed_count);
                    coupon_active.update(txn).await?;

                    record_deduction(txn, user_id, credit_amount, Some(code.clone()), now).await?;

                    let user = entities::Users::find_by_id(user_id)
                        .one(txn)
                        .await?
                        .ok_or(StorageError::UserNotFound(user_id))?;
                    let new_balance = user.credit_balance + credit_amount;
                    let mut user_active: entities::users::ActiveModel = user.into();
                    user_active.credit_balance = ActiveValue::Set(new_balance);
                    user_active.updated_at = ActiveValue::Set(now);
                    user_active.update(txn).await?;

                    Ok(new_balance)
                })
            })
            .await;

        match result {
            Ok(balance) => Ok(balance),
            Err(sea_orm::TransactionError::Connection(err)) => Err(StorageError::Db(err)),
            Err(sea_orm::TransactionError::Transaction(err)) => Err(err),
        }
    }

    async fn create_referral(
        &self,
        referrer_user_id: i64,
        referred_user_id: i64,
    ) -> StorageResult<i64> {
        let active = entities::referrals::ActiveModel {
            id: ActiveValue::NotSet,
            referrer_user_id: ActiveValue::Set(referrer_user_id),
            referred_user_id: ActiveValue::Set(referred_user_id),
            reward_credited: ActiveValue::Set(false),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = entities::Referrals::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn reward_referral(
        &self,
        referral_id: i64,
        referrer_amount: i64,
        referred_amount: i64,
    ) -> StorageResult<()> {
        let result = self
            .db
            .transaction::<_, (), StorageError>(|txn| {
                Box::pin(async move {
                    let referral = entities::Referrals::find_by_id(referral_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            StorageError::Db(sea_orm::DbErr::RecordNotFound(
                                "referral not found".to_string(),
                            ))
                        })?;
                    if referral.reward_credited {
                        return Ok(());
                    }

                    let now = OffsetDateTime::now_utc();
                    credit_user(txn, referral.referrer_user_id, referrer_amount, "referral", now)
                        .await?;
                    credit_user(txn, referral.referred_user_id, referred_amount, "referral", now)
                        .await?;

                    let mut active: entities::referrals::ActiveModel = referral.into();
                    active.reward_credited = ActiveValue::Set(true);
                    active.update(txn).await?;
                    Ok(())
                })
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(sea_orm::TransactionError::Connection(err)) => Err(StorageError::Db(err)),
            Err(sea_orm::TransactionError::Transaction(err)) => Err(err),
        }
    }

    async fn create_session(&self, user_id: i64) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::sessions::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(user_id),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Sessions::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn append_turn(&self, session_id: i64, role: &str, content: &str) -> StorageResult<i64> {
        let active = entities::turns::ActiveModel {
            id: ActiveValue::NotSet,
            session_id: ActiveValue::Set(session_id),
            role: ActiveValue::Set(role.to_string()),
            content: ActiveValue::Set(content.to_string()),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = entities::Turns::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn append_event(&self, event: &Event) -> StorageResult<()> {
        let now = OffsetDateTime::now_utc();
        let (event_type, at, payload) = match event {
            Event::Upstream(ev) => (
                "upstream",
                system_time_to_offset(ev.at),
                serde_json::to_value(ev)?,
            ),
            Event::Operational(ev) => {
                let event_type = match ev {
                    OperationalEvent::UnavailableStart(_) => "unavailable_start",
                    OperationalEvent::UnavailableEnd(_) => "unavailable_end",
                    OperationalEvent::CatalogRefreshed(_) => "catalog_refreshed",
                };
                (event_type, extract_operational_at(ev), serde_json::to_value(ev)?)
            }
        };

        let active = entities::internal_events::ActiveModel {
            id: ActiveValue::NotSet,
            event_type: ActiveValue::Set(event_type.to_string()),
            payload_json: ActiveValue::Set(payload),
            at: ActiveValue::Set(at),
            created_at: ActiveValue::Set(now),
        };
        entities::InternalEvents::insert(active)
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

async fn record_deduction(
    txn: &sea_orm::DatabaseTransaction,
    user_id: i64,
    delta: i64,
    correlation_id: Option<String>,
    at: OffsetDateTime,
) -> Result<(), StorageError> {
    let active = entities::credit_transactions::ActiveModel {
        id: ActiveValue::NotSet,
        user_id: ActiveValue::Set(user_id),
        delta: ActiveValue::Set(delta),
        reason: ActiveValue::Set("deduction".to_string()),
        correlation_id: ActiveValue::Set(correlation_id),
        metadata_json: ActiveValue::Set(None),
        created_at: ActiveValue::Set(at),
    };
    entities::CreditTransactions::insert(active)
        .exec(txn)
        .await?;
    Ok(())
}

async fn credit_user(
    txn: &sea_orm::DatabaseTransaction,
    user_id: i64,
    amount: i64,
    reason: &str,
    at: OffsetDateTime,
) -> Result<(), StorageError> {
    if amount == 0 {
        return Ok(());
    }
    let user = entities::Users::find_by_id(user_id)
        .one(txn)
        .await?
        .ok_or(StorageError::UserNotFound(user_id))?;
    let new_balance = user.credit_balance + amount;
    let mut active: entities::users::ActiveModel = user.into();
    active.credit_balance = ActiveValue::Set(new_balance);
    active.updated_at = ActiveValue::Set(at);
    active.update(txn).await?;

    let tx_active = entities::credit_transactions::ActiveModel {
        id: ActiveValue::NotSet,
        user_id: ActiveValue::Set(user_id),
        delta: ActiveValue::Set(amount),
        reason: ActiveValue::Set(reason.to_string()),
        correlation_id: ActiveValue::Set(None),
        metadata_json: ActiveValue::Set(None),
        created_at: ActiveValue::Set(at),
    };
    entities::CreditTransactions::insert(tx_active)
        .exec(txn)
        .await?;
    Ok(())
}

fn system_time_to_offset(at: std::time::SystemTime) -> OffsetDateTime {
    match at.duration_since(std::time::UNIX_EPOCH) {
        Ok(dur) => OffsetDateTime::from_unix_timestamp_nanos(dur.as_nanos() as i128)
            .unwrap_or_else(|_| OffsetDateTime::now_utc()),
        Err(_) => OffsetDateTime::now_utc(),
    }
}

fn extract_operational_at(ev: &OperationalEvent) -> OffsetDateTime {
    match ev {
        OperationalEvent::UnavailableStart(v) => system_time_to_offset(v.at),
        OperationalEvent::UnavailableEnd(v) => system_time_to_offset(v.at),
        OperationalEvent::CatalogRefreshed(v) => system_time_to_offset(v.at),
    }
}
