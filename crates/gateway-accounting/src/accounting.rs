use std::sync::Arc;

use gateway_protocol::openai::models::Pricing;
use gateway_storage::{ChargeOutcome, Storage, UsageCharge};

use crate::cost::{calculate_cost, RequestOutcome};
use crate::error::AccountingError;

/// Everything the router/HTTP layer learned about one finished request,
/// handed to `Accounting::charge` for the one atomic read-charge-record
/// step. Nothing upstream of this has touched the store.
pub struct ChargeRequest {
    pub user_id: i64,
    pub api_key_id: Option<i64>,
    pub model: String,
    pub gateway: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub pricing: Pricing,
    pub latency_ms: i64,
    pub outcome: RequestOutcome,
    pub correlation_id: Option<String>,
}

fn outcome_label(outcome: RequestOutcome) -> &'static str {
    match outcome {
        RequestOutcome::Success => "success",
        RequestOutcome::PartialStream => "partial_stream",
        RequestOutcome::FatalNoTokens => "fatal",
    }
}

pub struct Accounting {
    storage: Arc<dyn Storage>,
}

impl Accounting {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Computes cost from catalog pricing and the produced token counts,
    /// then delegates to `Storage::charge_usage` for the transactional
    /// balance/trial read, deduction, and usage-record insert. A usage
    /// record is always written, even when cost is zero, so "no billing
    /// without a usage record" holds in both directions.
    pub async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, AccountingError> {
        let (cost, cost_unknown) = calculate_cost(
            request.prompt_tokens,
            request.completion_tokens,
            &request.pricing,
            request.outcome,
        );

        let user_id = request.user_id;
        let charge = UsageCharge {
            user_id: request.user_id,
            api_key_id: request.api_key_id,
            model: request.model,
            gateway: request.gateway,
            prompt_tokens: request.prompt_tokens,
            completion_tokens: request.completion_tokens,
            cost,
            cost_unknown,
            latency_ms: request.latency_ms,
            outcome: outcome_label(request.outcome).to_string(),
            correlation_id: request.correlation_id,
        };

        let outcome = self.storage.charge_usage(charge).await?;
        tracing::info!(
            user_id,
            cost,
            cost_unknown,
            new_balance = outcome.new_balance,
            trial_just_exhausted = outcome.trial_just_exhausted,
            "usage charged"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use gateway_storage::snapshot::{GlobalConfigRow, StorageSnapshot};
    use gateway_storage::{
        ApiKeyRow, NewApiKey, StorageResult, TrialRow, UsageAggregate, UsageAggregateFilter,
        UserRow,
    };
    use gateway_provider_core::Event;

    use super::*;

    struct FakeStorage {
        last_charge: Mutex<Option<UsageCharge>>,
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
            unimplemented!()
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
        async fn find_api_key_by_hash(&self, _: &str) -> StorageResult<Option<ApiKeyRow>> {
            unimplemented!()
        }
        async fn touch_api_key(&self, _: i64) -> StorageResult<()> {
            unimplemented!()
        }
        async fn set_api_key_active(&self, _: i64, _: bool) -> StorageResult<()> {
            unimplemented!()
        }
        async fn delete_api_key(&self, _: i64) -> StorageResult<()> {
            unimplemented!()
        }
        async fn get_active_trial(&self, _: i64) -> StorageResult<Option<TrialRow>> {
            unimplemented!()
        }
        async fn grant_trial(
            &self,
            _: i64,
            _: time::OffsetDateTime,
            _: time::OffsetDateTime,
            _: i64,
            _: i64,
            _: i64,
        ) -> StorageResult<i64> {
            unimplemented!()
        }
        async fn reserve_trial_request(&self, _: i64) -> StorageResult<bool> {
            unimplemented!()
        }
        async fn release_trial_request(&self, _: i64) -> StorageResult<()> {
            unimplemented!()
        }
        async fn charge_usage(&self, charge: UsageCharge) -> StorageResult<ChargeOutcome> {
            let outcome = ChargeOutcome {
                usage_record_id: 1,
                new_balance: 1_000 - charge.cost,
                trial_consumed: None,
                trial_just_exhausted: false,
            };
            *self.last_charge.lock().unwrap() = Some(charge);
            Ok(outcome)
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

    #[tokio::test]
    async fn charge_passes_computed_cost_and_outcome_label_through() {
        let storage = Arc::new(FakeStorage {
            last_charge: Mutex::new(None),
        });
        let accounting = Accounting::new(storage.clone());
        accounting
            .charge(ChargeRequest {
                user_id: 42,
                api_key_id: Some(7),
                model: "openrouter/gpt-4o".to_string(),
                gateway: "openrouter".to_string(),
                prompt_tokens: 1000,
                completion_tokens: 500,
                pricing: Pricing {
                    prompt: "0.00002".to_string(),
                    completion: "0.00006".to_string(),
                    request: "0".to_string(),
                },
                latency_ms: 120,
                outcome: RequestOutcome::Success,
                correlation_id: Some("req-1".to_string()),
            })
            .await
            .expect("charges");

        let recorded = storage.last_charge.lock().unwrap().clone().expect("recorded a charge");
        assert_eq!(recorded.cost, 5);
        assert!(!recorded.cost_unknown);
        assert_eq!(recorded.outcome, "success");
        assert_eq!(recorded.user_id, 42);
    }

    #[tokio::test]
    async fn fatal_without_tokens_charges_zero() {
        let storage = Arc::new(FakeStorage {
            last_charge: Mutex::new(None),
        });
        let accounting = Accounting::new(storage.clone());
        accounting
            .charge(ChargeRequest {
                user_id: 42,
                api_key_id: None,
                model: "openrouter/gpt-4o".to_string(),
                gateway: "openrouter".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
                pricing: Pricing {
                    prompt: "0.01".to_string(),
                    completion: "0.01".to_string(),
                    request: "0.50".to_string(),
                },
                latency_ms: 40,
                outcome: RequestOutcome::FatalNoTokens,
                correlation_id: None,
            })
            .await
            .expect("charges");

        let recorded = storage.last_charge.lock().unwrap().clone().expect("recorded a charge");
        assert_eq!(recorded.cost, 0);
        assert_eq!(recorded.outcome, "fatal");
    }
}
