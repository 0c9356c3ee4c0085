use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gateway_common::CatalogConfig;
use gateway_catalog::Catalog;
use gateway_protocol::openai::chat::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use gateway_protocol::openai::models::{Modality, ModelEntry, Pricing};
use gateway_provider_core::{
    Credential, CredentialPool, EventHub, Provider, ProviderRegistry, ProviderResult, UpstreamCtx,
};
use tokio::sync::mpsc;

/// A provider whose catalog grows by one model every time `list_models` is
/// called, so tests can tell a fresh fetch apart from a cached read.
struct CountingProvider {
    name: &'static str,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Provider for CountingProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(
        &self,
        _ctx: &UpstreamCtx,
        _credential: &Credential,
        _request: &ChatCompletionRequest,
    ) -> ProviderResult<ChatCompletionResponse> {
        unimplemented!("not exercised by catalog tests")
    }

    async fn invoke_stream(
        &self,
        _ctx: &UpstreamCtx,
        _credential: &Credential,
        _request: &ChatCompletionRequest,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<ChatCompletionChunk>>> {
        unimplemented!("not exercised by catalog tests")
    }

    async fn list_models(&self, _credential: &Credential) -> ProviderResult<Vec<ModelEntry>> {
        let call_no = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok((0..call_no)
            .map(|i| ModelEntry {
                id: format!("{}/model-{i}", self.name),
                object: "model".to_string(),
                source_gateway: self.name.to_string(),
                display_name: format!("model-{i}"),
                context_length: None,
                pricing: Pricing::default(),
                modality: Modality::default(),
                huggingface: None,
                raw_upstream: None,
            })
            .collect())
    }
}

async fn build_catalog(ttl_s: u64, stale_ttl_s: u64) -> (Catalog, Arc<CountingProvider>) {
    let events = EventHub::new(16);
    let credentials = Arc::new(CredentialPool::new(events.clone()));
    credentials
        .insert(
            "test_gateway",
            1,
            Credential::ApiKey(gateway_provider_core::ApiKeyCredential {
                api_key: "k".to_string(),
            }),
        )
        .await;

    let provider = Arc::new(CountingProvider::new("test_gateway"));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());

    let config = CatalogConfig {
        ttl_s,
        stale_ttl_s,
        gateway_priority: vec!["*".to_string()],
    };
    let catalog = Catalog::new(Arc::new(registry), credentials, events, &config);
    (catalog, provider)
}

#[tokio::test(start_paused = true)]
async fn cold_read_blocks_on_a_fetch() {
    let (catalog, provider) = build_catalog(60, 300).await;
    let entries = catalog.get_models("test_gateway").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_read_does_not_refetch() {
    let (catalog, provider) = build_catalog(60, 300).await;
    catalog.get_models("test_gateway").await.unwrap();
    let second = catalog.get_models("test_gateway").await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_read_serves_old_data_and_kicks_off_a_background_refresh() {
    let (catalog, provider) = build_catalog(1, 300).await;
    catalog.get_models("test_gateway").await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    let stale = catalog.get_models("test_gateway").await.unwrap();
    assert_eq!(stale.len(), 1, "stale read should return the old snapshot immediately");

    // Give the spawned background refresh a chance to run.
    for _ in 0..20 {
        tokio::task::yield_now().await;
        if provider.calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
    }
    assert!(provider.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn invalidate_forces_a_blocking_refetch() {
    let (catalog, provider) = build_catalog(60, 300).await;
    catalog.get_models("test_gateway").await.unwrap();
    catalog.invalidate("test_gateway").unwrap();
    let after = catalog.get_models("test_gateway").await.unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cold_fetch_without_a_credential_errors_instead_of_panicking() {
    let events = EventHub::new(16);
    let credentials = Arc::new(CredentialPool::new(events.clone()));
    // No credential inserted for "test_gateway": the first fetch has nothing
    // to authenticate with, so it must surface an error rather than panic.
    let provider = Arc::new(CountingProvider::new("test_gateway"));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let config = CatalogConfig {
        ttl_s: 60,
        stale_ttl_s: 300,
        gateway_priority: vec!["*".to_string()],
    };
    let catalog = Catalog::new(Arc::new(registry), credentials, events, &config);

    let result = catalog.get_models("test_gateway").await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn get_all_merges_across_gateways() {
    let events = EventHub::new(16);
    let credentials = Arc::new(CredentialPool::new(events.clone()));
    credentials
        .insert(
            "alpha",
            1,
            Credential::ApiKey(gateway_provider_core::ApiKeyCredential {
                api_key: "a".to_string(),
            }),
        )
        .await;
    credentials
        .insert(
            "beta",
            2,
            Credential::ApiKey(gateway_provider_core::ApiKeyCredential {
                api_key: "b".to_string(),
            }),
        )
        .await;

    let alpha = Arc::new(CountingProvider::new("alpha"));
    let beta = Arc::new(CountingProvider::new("beta"));
    let mut registry = ProviderRegistry::new();
    registry.register(alpha.clone());
    registry.register(beta.clone());

    let config = CatalogConfig {
        ttl_s: 60,
        stale_ttl_s: 300,
        gateway_priority: vec!["alpha".to_string(), "beta".to_string()],
    };
    let catalog = Catalog::new(Arc::new(registry), credentials, events, &config);

    catalog.get_models("alpha").await.unwrap();
    catalog.get_models("beta").await.unwrap();

    let all = catalog.get_all().await;
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|e| e.source_gateway == "alpha"));
    assert!(all.iter().any(|e| e.source_gateway == "beta"));
}
