//! Shared config types and small primitives used across the gateway workspace.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash (not plaintext).
    pub admin_key_hash: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Key/value cache DSN (rate limits, catalog singleflight markers).
    pub cache_url: Option<String>,
    /// Whether to redact sensitive fields in emitted logs.
    pub event_redact_sensitive: bool,
    pub timeouts: TimeoutConfig,
    pub catalog: CatalogConfig,
    pub rate_limit_defaults: RateLimitDefaults,
    pub per_gateway_concurrency: u32,
    pub huggingface_fetch_sorts: Vec<String>,
    pub key_hash_salt: String,
    pub key_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub request_ms: u64,
    pub attempt_ms: u64,
    pub stream_idle_ms: u64,
    pub credit_transaction_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 60_000,
            attempt_ms: 30_000,
            stream_idle_ms: 20_000,
            credit_transaction_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn attempt(&self) -> Duration {
        Duration::from_millis(self.attempt_ms)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_millis(self.stream_idle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub ttl_s: u64,
    pub stale_ttl_s: u64,
    /// `GetAll` merge order: an entry from an earlier gateway in this list
    /// wins ties on canonical model id over a later one. The literal entry
    /// `"*"` expands to every registered gateway not otherwise named here,
    /// in a stable (alphabetical) order; this is where direct-provider
    /// adapters fall by default, between the aggregators that should outrank
    /// them and the ones that shouldn't.
    pub gateway_priority: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_s: 300,
            stale_ttl_s: 3600,
            gateway_priority: vec![
                "openrouter".to_string(),
                "vercel_ai_gateway".to_string(),
                "*".to_string(),
                "portkey".to_string(),
                "huggingface".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            per_minute: 60,
            per_hour: 1_000,
            per_day: 10_000,
        }
    }
}

/// Optional layer used for merging global config (CLI > ENV > DB).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_key_hash: Option<String>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub cache_url: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub timeouts: Option<TimeoutConfig>,
    pub catalog: Option<CatalogConfig>,
    pub rate_limit_defaults: Option<RateLimitDefaults>,
    pub per_gateway_concurrency: Option<u32>,
    pub huggingface_fetch_sorts: Option<Vec<String>>,
    pub key_hash_salt: Option<String>,
    pub key_version: Option<u32>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(host);
        take!(port);
        take!(admin_key_hash);
        take!(proxy);
        take!(dsn);
        take!(cache_url);
        take!(event_redact_sensitive);
        take!(timeouts);
        take!(catalog);
        take!(rate_limit_defaults);
        take!(per_gateway_concurrency);
        take!(huggingface_fetch_sorts);
        take!(key_hash_salt);
        take!(key_version);
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            admin_key_hash: self
                .admin_key_hash
                .ok_or(GlobalConfigError::MissingField("admin_key_hash"))?,
            proxy: self.proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            cache_url: self.cache_url,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            timeouts: self.timeouts.unwrap_or_default(),
            catalog: self.catalog.unwrap_or_default(),
            rate_limit_defaults: self.rate_limit_defaults.unwrap_or_default(),
            per_gateway_concurrency: self.per_gateway_concurrency.unwrap_or(64),
            huggingface_fetch_sorts: self
                .huggingface_fetch_sorts
                .unwrap_or_else(|| vec!["likes".to_string(), "downloads".to_string()]),
            key_hash_salt: self.key_hash_salt.unwrap_or_default(),
            key_version: self.key_version.unwrap_or(1),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_key_hash: Some(value.admin_key_hash),
            proxy: value.proxy,
            dsn: Some(value.dsn),
            cache_url: value.cache_url,
            event_redact_sensitive: Some(value.event_redact_sensitive),
            timeouts: Some(value.timeouts),
            catalog: Some(value.catalog),
            rate_limit_defaults: Some(value.rate_limit_defaults),
            per_gateway_concurrency: Some(value.per_gateway_concurrency),
            huggingface_fetch_sorts: Some(value.huggingface_fetch_sorts),
            key_hash_salt: Some(value.key_hash_salt),
            key_version: Some(value.key_version),
        }
    }
}

/// Environment tag encoded in an API key prefix (`gw_{env}_...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Live,
    Test,
    Staging,
    Development,
}

impl Environment {
    pub fn as_prefix(&self) -> &'static str {
        match self {
            Environment::Live => "live",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Development => "dev",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "live" => Some(Environment::Live),
            "test" => Some(Environment::Test),
            "staging" => Some(Environment::Staging),
            "dev" | "development" => Some(Environment::Development),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_prefix_round_trips() {
        for env in [
            Environment::Live,
            Environment::Test,
            Environment::Staging,
            Environment::Development,
        ] {
            assert_eq!(Environment::parse(env.as_prefix()), Some(env));
        }
    }

    #[test]
    fn patch_overlay_prefers_later_values() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(1),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(2),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(2));
    }
}
