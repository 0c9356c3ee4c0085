use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_common::CatalogConfig;
use gateway_protocol::openai::models::ModelEntry;
use gateway_provider_core::{CredentialPool, EventHub, ProviderRegistry};

use crate::error::{CatalogError, CatalogResult};
use crate::gateway_cache::GatewayCache;
use crate::merge::merge_entries;

/// The unified model catalog: one `GatewayCache` per registered provider,
/// fetched and normalized by that provider's `list_models`, merged on
/// demand for `GetAll`.
pub struct Catalog {
    gateways: HashMap<String, Arc<GatewayCache>>,
    gateway_order: Vec<String>,
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialPool>,
    events: EventHub,
}

impl Catalog {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        credentials: Arc<CredentialPool>,
        events: EventHub,
        config: &CatalogConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.ttl_s);
        let stale_ttl = Duration::from_secs(config.stale_ttl_s);
        let gateways = registry
            .names()
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    Arc::new(GatewayCache::new(name.to_string(), ttl, stale_ttl)),
                )
            })
            .collect();
        let gateway_order = expand_priority(&config.gateway_priority, &registry.names());
        Self {
            gateways,
            gateway_order,
            registry,
            credentials,
            events,
        }
    }

    fn cache(&self, gateway: &str) -> CatalogResult<&Arc<GatewayCache>> {
        self.gateways
            .get(gateway)
            .ok_or_else(|| CatalogError::UnknownGateway(gateway.to_string()))
    }

    fn provider(&self, gateway: &str) -> CatalogResult<Arc<dyn gateway_provider_core::Provider>> {
        self.registry
            .get(gateway)
            .ok_or_else(|| CatalogError::UnknownGateway(gateway.to_string()))
    }

    pub async fn get_models(&self, gateway: &str) -> CatalogResult<Arc<Vec<ModelEntry>>> {
        let cache = self.cache(gateway)?.clone();
        let provider = self.provider(gateway)?;
        cache
            .get_models(provider, self.credentials.clone(), self.events.clone())
            .await
    }

    /// The expanded gateway priority order this catalog was built with, for
    /// callers (the router) that need to walk gateways individually rather
    /// than through the merged `GetAll` view.
    pub fn gateway_order(&self) -> &[String] {
        &self.gateway_order
    }

    pub async fn get_all(&self) -> Vec<ModelEntry> {
        let mut snapshots: HashMap<String, Arc<Vec<ModelEntry>>> = HashMap::new();
        for (name, cache) in &self.gateways {
            if let Some(cell) = cache.snapshot() {
                snapshots.insert(name.clone(), cell.entries.clone());
            }
        }
        merge_entries(&self.gateway_order, |gateway| {
            snapshots.get(gateway).map(|entries| entries.as_slice())
        })
    }

    pub async fn refresh(&self, gateway: &str) -> CatalogResult<Arc<Vec<ModelEntry>>> {
        let cache = self.cache(gateway)?.clone();
        let provider = self.provider(gateway)?;
        cache
            .refresh(provider, self.credentials.clone(), self.events.clone())
            .await
    }

    pub fn invalidate(&self, gateway: &str) -> CatalogResult<()> {
        self.cache(gateway)?.invalidate();
        Ok(())
    }

    pub fn invalidate_all(&self) {
        for cache in self.gateways.values() {
            cache.invalidate();
        }
    }
}

/// Expands the `"*"` sentinel in a configured priority list to every
/// registered gateway not otherwise named, in alphabetical order, so the
/// resulting order always covers every gateway exactly once.
fn expand_priority(configured: &[String], registered: &[&str]) -> Vec<String> {
    let mut named: Vec<String> = Vec::new();
    let mut unnamed_slot: Option<usize> = None;
    for entry in configured {
        if entry == "*" {
            unnamed_slot = Some(named.len());
        } else if registered.contains(&entry.as_str()) {
            named.push(entry.clone());
        }
    }

    let mut unnamed: Vec<String> = registered
        .iter()
        .filter(|name| !named.contains(&name.to_string()))
        .map(|name| name.to_string())
        .collect();
    unnamed.sort();

    match unnamed_slot {
        Some(idx) => {
            let mut result = named;
            result.splice(idx..idx, unnamed);
            result
        }
        None => {
            named.extend(unnamed);
            named
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_wildcard_between_named_tiers() {
        let configured = vec![
            "openrouter".to_string(),
            "*".to_string(),
            "portkey".to_string(),
        ];
        let registered = vec!["groq", "openrouter", "portkey", "together"];
        let order = expand_priority(&configured, &registered);
        assert_eq!(order, vec!["openrouter", "groq", "together", "portkey"]);
    }

    #[test]
    fn drops_configured_names_that_are_not_registered() {
        let configured = vec![
            "openrouter".to_string(),
            "vercel_ai_gateway".to_string(),
            "*".to_string(),
        ];
        let registered = vec!["openrouter", "groq"];
        let order = expand_priority(&configured, &registered);
        assert_eq!(order, vec!["openrouter", "groq"]);
    }
}
