use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gateway_common::Environment;
use gateway_storage::{ApiKeyRow, Storage, UserRow};

use crate::error::GateError;
use crate::permit::Permit;
#[cfg(test)]
use crate::permit::ReleaseOutcome;
use crate::rate_limit::RateLimiter;
use crate::token::{hash_token, parse_token};

/// Per-route admission requirements, known to the caller (the HTTP layer)
/// before `Gate::admit` is invoked.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteMeta {
    pub required_scope: Option<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<IpAddr>,
    pub referrer: Option<String>,
}

pub struct Admission {
    pub user: UserRow,
    pub api_key: ApiKeyRow,
    pub permit: Permit,
}

/// `Admit(credential, route, request_meta) -> (User, ApiKey, Policy, Permit)`.
/// Each step below returns as soon as it rejects; dimensions not yet reached
/// are left untouched, per the documented reject rule.
pub struct Gate {
    storage: Arc<dyn Storage>,
    rate_limiter: RateLimiter,
    key_hash_salt: String,
    deployment_environment: Environment,
}

impl Gate {
    pub fn new(
        storage: Arc<dyn Storage>,
        rate_limiter: RateLimiter,
        key_hash_salt: String,
        deployment_environment: Environment,
    ) -> Self {
        Self {
            storage,
            rate_limiter,
            key_hash_salt,
            deployment_environment,
        }
    }

    pub async fn admit(
        &self,
        token: &str,
        route: &RouteMeta,
        request: &RequestMeta,
    ) -> Result<Admission, GateError> {
        // 1. Credential resolution.
        let parsed = parse_token(token).ok_or(GateError::Unauthenticated)?;
        if parsed.environment != self.deployment_environment {
            return Err(GateError::Forbidden("key environment mismatch"));
        }
        let key_hash = hash_token(token, &self.key_hash_salt);
        let api_key = self
            .storage
            .find_api_key_by_hash(&key_hash)
            .await?
            .ok_or(GateError::Unauthenticated)?;
        if !api_key.active {
            return Err(GateError::Unauthenticated);
        }
        if let Some(expires_at) = api_key.expires_at
            && expires_at <= time::OffsetDateTime::now_utc()
        {
            return Err(GateError::Unauthenticated);
        }

        // 2. Scope check.
        if let Some(scope) = route.required_scope
            && !api_key
                .scopes_json
                .get(scope)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        {
            return Err(GateError::Forbidden("missing required scope"));
        }

        // 3. Perimeter check (IP / referrer allowlists).
        if let Some(allowlist) = api_key.ip_allowlist_json.as_ref() {
            let ip = request.ip.ok_or(GateError::Forbidden("ip not provided"))?;
            if !array_contains_str(allowlist, &ip.to_string()) {
                return Err(GateError::Forbidden("ip not allowlisted"));
            }
        }
        if let Some(allowlist) = api_key.referrer_allowlist_json.as_ref() {
            let referrer = request
                .referrer
                .as_deref()
                .ok_or(GateError::Forbidden("referrer not provided"))?;
            if !array_contains_str(allowlist, referrer) {
                return Err(GateError::Forbidden("referrer not allowlisted"));
            }
        }

        // 4. Rate-limit admission. Concurrency first (cheap, nothing else
        // touched yet if it rejects); then the fixed windows, releasing the
        // concurrency slot immediately if a window rejects.
        let concurrency_permit = self
            .rate_limiter
            .acquire_concurrency(api_key.id)
            .await
            .ok_or(GateError::RateLimited { retry_after_secs: 1 })?;
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        if let Err(err) = self.rate_limiter.admit_windows(api_key.id, now_unix) {
            drop(concurrency_permit);
            return Err(err);
        }

        // 5. Trial / credit check with request-slot reservation. This does
        // not deduct; `gateway-accounting` performs the real charge once the
        // request's cost is known.
        let user = self
            .storage
            .get_user(api_key.user_id)
            .await?
            .ok_or(GateError::Unauthenticated)?;
        if !user.active {
            return Err(GateError::Forbidden("user inactive"));
        }

        let trial = self.storage.get_active_trial(user.id).await?;
        let trial_reservation = match trial {
            Some(trial) if trial.credits_remaining > 0 && trial.tokens_remaining > 0 => {
                if !self.storage.reserve_trial_request(trial.id).await? {
                    return Err(GateError::TrialExhausted);
                }
                Some(trial.id)
            }
            Some(_) => return Err(GateError::TrialExhausted),
            None => {
                if user.credit_balance <= 0 {
                    return Err(GateError::InsufficientCredits);
                }
                None
            }
        };

        self.storage.touch_api_key(api_key.id).await?;

        Ok(Admission {
            user,
            permit: Permit::new(api_key.id, concurrency_permit, trial_reservation),
            api_key,
        })
    }
}

fn array_contains_str(value: &serde_json::Value, needle: &str) -> bool {
    value
        .as_array()
        .map(|entries| entries.iter().any(|entry| entry.as_str() == Some(needle)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use gateway_common::RateLimitDefaults;
    use gateway_storage::snapshot::GlobalConfigRow;
    use gateway_storage::{
        ChargeOutcome, NewApiKey, StorageResult, StorageSnapshot, TrialRow, UsageAggregate,
        UsageAggregateFilter, UsageCharge,
    };
    use gateway_provider_core::Event;
    use time::OffsetDateTime;

    use super::*;

    struct FakeStorage {
        api_key: ApiKeyRow,
        user: Mutex<UserRow>,
        trial: Mutex<Option<TrialRow>>,
    }

    #[async_trait::async_trait]
    impl Storage for FakeStorage {
        async fn sync(&self) -> StorageResult<()> {
            unimplemented!()
        }
        async fn load_global_config(&self) -> StorageResult<Option<GlobalConfigRow>> {
            unimplemented!()
        }
        async fn upsert_global_config(&self, _: &gateway_common::GlobalConfig) -> StorageResult<()> {
            unimplemented!()
        }
        async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
            unimplemented!()
        }
        async fn upsert_provider(&self, _: &str, _: &serde_json::Value, _: bool) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn delete_provider(&self, _: &str) -> StorageResult<()> {
            unimplemented!()
        }
        async fn insert_credential(
            &self,
            _: &str,
            _: Option<&str>,
            _: &serde_json::Value,
            _: &serde_json::Value,
            _: bool,
        ) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn update_credential(
            &self,
            _: i64,
            _: Option<&str>,
            _: &serde_json::Value,
            _: &serde_json::Value,
        ) -> StorageResult<()> {
            unimplemented!()
        }
        async fn set_credential_enabled(&self, _: i64, _: bool) -> StorageResult<()> {
            unimplemented!()
        }
        async fn delete_credential(&self, _: i64) -> StorageResult<()> {
            unimplemented!()
        }
        async fn create_user(&self) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn get_user(&self, _: i64) -> StorageResult<Option<UserRow>> {
            Ok(Some(self.user.lock().unwrap().clone()))
        }
        async fn set_user_active(&self, _: i64, _: bool) -> StorageResult<()> {
            unimplemented!()
        }
        async fn set_user_subscription_status(&self, _: i64, _: &str) -> StorageResult<()> {
            unimplemented!()
        }
        async fn insert_api_key(&self, _: NewApiKey) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn find_api_key_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKeyRow>> {
            let expected = hash_token("gw_test_abc123", "pepper");
            if key_hash == expected {
                Ok(Some(self.api_key.clone()))
            } else {
                Ok(None)
            }
        }
        async fn touch_api_key(&self, _: i64) -> StorageResult<()> {
            Ok(())
        }
        async fn set_api_key_active(&self, _: i64, _: bool) -> StorageResult<()> {
            unimplemented!()
        }
        async fn delete_api_key(&self, _: i64) -> StorageResult<()> {
            unimplemented!()
        }
        async fn get_active_trial(&self, _: i64) -> StorageResult<Option<TrialRow>> {
            Ok(self.trial.lock().unwrap().clone())
        }
        async fn grant_trial(
            &self,
            _: i64,
            _: OffsetDateTime,
            _: OffsetDateTime,
            _: i64,
            _: i64,
            _: i64,
        ) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn reserve_trial_request(&self, _: i64) -> StorageResult<bool> {
            let mut guard = self.trial.lock().unwrap();
            let Some(trial) = guard.as_mut() else {
                return Ok(false);
            };
            if trial.requests_remaining <= 0 {
                return Ok(false);
            }
            trial.requests_remaining -= 1;
            Ok(true)
        }
        async fn release_trial_request(&self, _: i64) -> StorageResult<()> {
            let mut guard = self.trial.lock().unwrap();
            if let Some(trial) = guard.as_mut() {
                trial.requests_remaining += 1;
            }
            Ok(())
        }
        async fn charge_usage(&self, _: UsageCharge) -> StorageResult<ChargeOutcome> {
            unimplemented!()
        }
        async fn aggregate_usage(&self, _: UsageAggregateFilter) -> StorageResult<UsageAggregate> {
            unimplemented!()
        }
        async fn list_api_keys(&self, _: i64) -> StorageResult<Vec<ApiKeyRow>> {
            unimplemented!()
        }
        async fn list_credit_transactions(
            &self,
            _: i64,
            _: u64,
            _: u64,
        ) -> StorageResult<Vec<gateway_storage::CreditTransactionRow>> {
            unimplemented!()
        }
        async fn grant_credits(&self, _: i64, _: i64, _: &str, _: Option<String>) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn create_coupon(
            &self,
            _: &str,
            _: i64,
            _: i32,
            _: Option<time::OffsetDateTime>,
        ) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn redeem_coupon(&self, _: &str, _: i64) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn create_referral(&self, _: i64, _: i64) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn reward_referral(&self, _: i64, _: i64, _: i64) -> StorageResult<()> {
            unimplemented!()
        }
        async fn create_session(&self, _: i64) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn append_turn(&self, _: i64, _: &str, _: &str) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn append_event(&self, _: &Event) -> StorageResult<()> {
            unimplemented!()
        }
    }

    fn api_key_row() -> ApiKeyRow {
        ApiKeyRow {
            id: 1,
            user_id: 1,
            environment: "test".to_string(),
            scopes_json: serde_json::json!({"chat": true}),
            is_primary: true,
            active: true,
            expires_at: None,
            max_requests: None,
            request_count: 0,
            ip_allowlist_json: None,
            referrer_allowlist_json: None,
        }
    }

    fn user_row(credit_balance: i64) -> UserRow {
        UserRow {
            id: 1,
            credit_balance,
            subscription_status: "active".to_string(),
            active: true,
        }
    }

    fn gate_with(storage: FakeStorage) -> Gate {
        Gate::new(
            Arc::new(storage),
            RateLimiter::new(RateLimitDefaults::default(), 64),
            "pepper".to_string(),
            Environment::Test,
        )
    }

    #[tokio::test]
    async fn admits_user_with_sufficient_balance() {
        let gate = gate_with(FakeStorage {
            api_key: api_key_row(),
            user: Mutex::new(user_row(100)),
            trial: Mutex::new(None),
        });
        let admission = gate
            .admit("gw_test_abc123", &RouteMeta::default(), &RequestMeta::default())
            .await
            .expect("admits");
        assert_eq!(admission.user.id, 1);
    }

    #[tokio::test]
    async fn rejects_unknown_key() {
        let gate = gate_with(FakeStorage {
            api_key: api_key_row(),
            user: Mutex::new(user_row(100)),
            trial: Mutex::new(None),
        });
        let err = gate
            .admit("gw_test_wrongkey", &RouteMeta::default(), &RequestMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Unauthenticated));
    }

    #[tokio::test]
    async fn rejects_environment_mismatch() {
        let gate = gate_with(FakeStorage {
            api_key: api_key_row(),
            user: Mutex::new(user_row(100)),
            trial: Mutex::new(None),
        });
        let err = gate
            .admit("gw_live_abc123", &RouteMeta::default(), &RequestMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rejects_zero_balance_with_no_trial() {
        let gate = gate_with(FakeStorage {
            api_key: api_key_row(),
            user: Mutex::new(user_row(0)),
            trial: Mutex::new(None),
        });
        let err = gate
            .admit("gw_test_abc123", &RouteMeta::default(), &RequestMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InsufficientCredits));
    }

    #[tokio::test]
    async fn reserves_and_releases_a_trial_request_slot() {
        let now = OffsetDateTime::now_utc();
        let storage: Arc<dyn Storage> = Arc::new(FakeStorage {
            api_key: api_key_row(),
            user: Mutex::new(user_row(0)),
            trial: Mutex::new(Some(TrialRow {
                id: 7,
                user_id: 1,
                starts_at: now,
                ends_at: now + time::Duration::days(1),
                credits_remaining: 500,
                tokens_remaining: 500,
                requests_remaining: 1,
            })),
        });
        let gate = Gate::new(
            storage.clone(),
            RateLimiter::new(RateLimitDefaults::default(), 64),
            "pepper".to_string(),
            Environment::Test,
        );
        let admission = gate
            .admit("gw_test_abc123", &RouteMeta::default(), &RequestMeta::default())
            .await
            .expect("admits on trial");
        // A second reservation attempt would now fail (slot already taken);
        // releasing it on abort must give it back.
        assert!(!storage.reserve_trial_request(7).await.unwrap());
        admission
            .permit
            .release(&*storage, ReleaseOutcome::Aborted)
            .await
            .expect("release succeeds");
        assert!(storage.reserve_trial_request(7).await.unwrap());
    }

    #[tokio::test]
    async fn enforces_required_scope() {
        let mut key = api_key_row();
        key.scopes_json = serde_json::json!({"chat": false});
        let gate = gate_with(FakeStorage {
            api_key: key,
            user: Mutex::new(user_row(100)),
            trial: Mutex::new(None),
        });
        let err = gate
            .admit(
                "gw_test_abc123",
                &RouteMeta {
                    required_scope: Some("chat"),
                },
                &RequestMeta::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Forbidden(_)));
    }
}
