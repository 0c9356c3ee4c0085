//! CLI/ENV/DB config merge (CLI > ENV > DB, persisted back to DB), provider
//! and credential seeding from `<GATEWAY>_API_KEY`-style env vars, and
//! assembly of the one `AppState` the process runs with.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gateway_accounting::Accounting;
use gateway_catalog::Catalog;
use gateway_common::{Environment, GlobalConfig, GlobalConfigPatch, RateLimitDefaults, TimeoutConfig};
use gateway_gate::{Gate, RateLimiter};
use gateway_provider_core::{Credential, CredentialPool, EventHub, ProviderConfig, ProviderRegistry, TerminalEventSink};
use gateway_provider_impl::build_provider;
use gateway_router::Router as DispatchRouter;
use gateway_storage::{DbEventSink, SeaOrmStorage, Storage};

use crate::state::AppState;

#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version, about = "Multi-provider AI inference gateway")]
pub struct CliArgs {
    #[arg(long, env = "DATABASE_URL")]
    pub dsn: Option<String>,
    #[arg(long, env = "CACHE_URL")]
    pub cache_url: Option<String>,
    #[arg(long, env = "HOST")]
    pub host: Option<String>,
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
    /// Plaintext admin secret; only the hash is ever persisted or kept in memory.
    #[arg(long, env = "ADMIN_KEY")]
    pub admin_key: Option<String>,
    #[arg(long, env = "PROXY")]
    pub proxy: Option<String>,
    #[arg(long, env = "EVENT_REDACT_SENSITIVE")]
    pub event_redact_sensitive: Option<bool>,
    #[arg(long, env = "KEY_HASH_SALT")]
    pub key_hash_salt: Option<String>,
    #[arg(long, env = "KEY_VERSION")]
    pub key_version: Option<u32>,
    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,
    #[arg(long, env = "ATTEMPT_TIMEOUT_MS")]
    pub attempt_timeout_ms: Option<u64>,
    #[arg(long, env = "STREAM_IDLE_MS")]
    pub stream_idle_ms: Option<u64>,
    #[arg(long, env = "CATALOG_TTL_S")]
    pub catalog_ttl_s: Option<u64>,
    #[arg(long, env = "CATALOG_STALE_TTL_S")]
    pub catalog_stale_ttl_s: Option<u64>,
    #[arg(long, env = "HUGGINGFACE_FETCH_SORTS", value_delimiter = ',')]
    pub huggingface_fetch_sorts: Option<Vec<String>>,
    #[arg(long, env = "RATE_LIMIT_DEFAULT_PER_MINUTE")]
    pub rate_limit_default_per_minute: Option<u32>,
    #[arg(long, env = "RATE_LIMIT_DEFAULT_PER_HOUR")]
    pub rate_limit_default_per_hour: Option<u32>,
    #[arg(long, env = "RATE_LIMIT_DEFAULT_PER_DAY")]
    pub rate_limit_default_per_day: Option<u32>,
    #[arg(long, env = "PER_GATEWAY_CONCURRENCY")]
    pub per_gateway_concurrency: Option<u32>,
    #[arg(long, env = "PER_KEY_CONCURRENCY", default_value_t = 16)]
    pub per_key_concurrency: usize,
    /// `live`, `test`, `staging`, or `dev`/`development`; gates which key
    /// environment prefix this process will admit.
    #[arg(long, env = "DEPLOYMENT_ENVIRONMENT", default_value = "live")]
    pub deployment_environment: String,
}

pub struct Bootstrap {
    pub state: Arc<AppState>,
    pub host: String,
    pub port: u16,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    bootstrap(CliArgs::parse()).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let deployment_environment =
        Environment::parse(&args.deployment_environment).with_context(|| format!("invalid deployment environment: {}", args.deployment_environment))?;

    let dsn = args.dsn.clone().unwrap_or_else(|| "sqlite://gateway.db?mode=rwc".to_string());
    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await.context("connect storage")?);
    storage.sync().await.context("schema sync")?;

    let db_global = storage.load_global_config().await.context("load global config")?;
    let mut merged = db_global.map(|row| GlobalConfigPatch::from(row.config)).unwrap_or_default();

    let admin_key_hash = args.admin_key.as_deref().map(hash_admin_key);
    let admin_key_hash = match admin_key_hash.or_else(|| merged.admin_key_hash.clone()) {
        Some(hash) => hash,
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            eprintln!("generated admin key: {generated}");
            hash_admin_key(&generated)
        }
    };

    merged.overlay(GlobalConfigPatch {
        host: args.host,
        port: args.port,
        admin_key_hash: Some(admin_key_hash),
        proxy: args.proxy,
        dsn: Some(dsn),
        cache_url: args.cache_url,
        event_redact_sensitive: args.event_redact_sensitive,
        timeouts: Some(TimeoutConfig {
            request_ms: args.request_timeout_ms.unwrap_or(merged.timeouts.map(|t| t.request_ms).unwrap_or(60_000)),
            attempt_ms: args.attempt_timeout_ms.unwrap_or(merged.timeouts.map(|t| t.attempt_ms).unwrap_or(30_000)),
            stream_idle_ms: args.stream_idle_ms.unwrap_or(merged.timeouts.map(|t| t.stream_idle_ms).unwrap_or(20_000)),
            credit_transaction_ms: merged.timeouts.map(|t| t.credit_transaction_ms).unwrap_or(5_000),
        }),
        catalog: Some(gateway_common::CatalogConfig {
            ttl_s: args.catalog_ttl_s.unwrap_or_else(|| merged.catalog.as_ref().map(|c| c.ttl_s).unwrap_or(300)),
            stale_ttl_s: args.catalog_stale_ttl_s.unwrap_or_else(|| merged.catalog.as_ref().map(|c| c.stale_ttl_s).unwrap_or(3600)),
            gateway_priority: merged
                .catalog
                .as_ref()
                .map(|c| c.gateway_priority.clone())
                .unwrap_or_else(|| gateway_common::CatalogConfig::default().gateway_priority),
        }),
        rate_limit_defaults: Some(RateLimitDefaults {
            per_minute: args.rate_limit_default_per_minute.unwrap_or(merged.rate_limit_defaults.map(|r| r.per_minute).unwrap_or(60)),
            per_hour: args.rate_limit_default_per_hour.unwrap_or(merged.rate_limit_defaults.map(|r| r.per_hour).unwrap_or(1_000)),
            per_day: args.rate_limit_default_per_day.unwrap_or(merged.rate_limit_defaults.map(|r| r.per_day).unwrap_or(10_000)),
        }),
        per_gateway_concurrency: args.per_gateway_concurrency.or(merged.per_gateway_concurrency),
        huggingface_fetch_sorts: args.huggingface_fetch_sorts.or(merged.huggingface_fetch_sorts.clone()),
        key_hash_salt: args.key_hash_salt.or(merged.key_hash_salt.clone()),
        key_version: args.key_version.or(merged.key_version),
    });

    let global: GlobalConfig = merged.into_config().context("finalize merged global config")?;
    storage.upsert_global_config(&global).await.context("upsert global config")?;

    let events = EventHub::new(1024);
    events.add_sink(Arc::new(TerminalEventSink::new())).await;
    events.add_sink(Arc::new(DbEventSink::new(storage.clone()))).await;

    let credentials = Arc::new(CredentialPool::new(events.clone()));
    let mut registry = ProviderRegistry::new();
    seed_providers(storage.as_ref(), &registry_seeds(&global), &credentials).await.context("seed providers")?;
    for (name, config) in registry_seeds(&global) {
        registry.register(build_provider(name, &config));
    }
    let registry = Arc::new(registry);

    let catalog = Arc::new(Catalog::new(registry.clone(), credentials.clone(), events.clone(), &global.catalog));

    let gate = Gate::new(
        storage.clone(),
        RateLimiter::new(global.rate_limit_defaults, args.per_key_concurrency),
        global.key_hash_salt.clone(),
        deployment_environment,
    );
    let router = DispatchRouter::new(catalog.clone(), registry.clone(), credentials.clone(), global.timeouts, global.per_gateway_concurrency, 0);
    let accounting = Accounting::new(storage.clone());

    let state = Arc::new(AppState {
        global: arc_swap::ArcSwap::from_pointee(global.clone()),
        deployment_environment,
        storage: storage.clone(),
        gate,
        router,
        accounting,
        catalog,
        registry,
    });

    Ok(Bootstrap {
        host: global.host.clone(),
        port: global.port,
        state,
    })
}

/// One `(name, config)` pair per provider this deployment knows how to
/// build, regardless of whether a credential is currently configured for it:
/// listing and routing both need every gateway registered so the catalog
/// priority order and the router's per-gateway semaphores line up.
fn registry_seeds(global: &GlobalConfig) -> Vec<(&'static str, ProviderConfig)> {
    use gateway_provider_core::{
        DeepInfraConfig, HuggingFaceConfig, ModelRecord, ModelTable, OpenAICompatibleConfig, OpenRouterConfig, PortkeyConfig,
        StaticCatalogConfig, VertexConfig,
    };

    vec![
        ("openrouter", ProviderConfig::OpenRouter(OpenRouterConfig { base_url: "https://openrouter.ai/api/v1".to_string() })),
        (
            "portkey",
            ProviderConfig::Portkey(PortkeyConfig {
                base_url: "https://api.portkey.ai/v1".to_string(),
                sub_providers: vec!["deepinfra".to_string(), "groq".to_string(), "together".to_string()],
            }),
        ),
        (
            "vertex",
            ProviderConfig::Vertex(VertexConfig {
                base_url: "https://{location}-aiplatform.googleapis.com/v1".to_string(),
                location: std::env::var("GOOGLE_VERTEX_LOCATION").unwrap_or_else(|_| "us-central1".to_string()),
                token_uri: "https://oauth2.googleapis.com/token".to_string(),
            }),
        ),
        (
            "deepinfra",
            ProviderConfig::DeepInfra(DeepInfraConfig {
                base_url: "https://api.deepinfra.com/v1/openai".to_string(),
                upstream_provider_hint: "deepinfra".to_string(),
            }),
        ),
        (
            "huggingface",
            ProviderConfig::HuggingFace(HuggingFaceConfig {
                base_url: "https://api-inference.huggingface.co/v1".to_string(),
                fetch_sorts: global.huggingface_fetch_sorts.clone(),
            }),
        ),
        (
            "fal_ai",
            ProviderConfig::FalAi(StaticCatalogConfig {
                base_url: "https://fal.run".to_string(),
                model_table: ModelTable {
                    models: vec![
                        ModelRecord { id: "fal-ai/flux/schnell".to_string(), display_name: Some("FLUX.1 [schnell]".to_string()) },
                        ModelRecord { id: "fal-ai/flux/dev".to_string(), display_name: Some("FLUX.1 [dev]".to_string()) },
                    ],
                },
            }),
        ),
        (
            "chutes",
            ProviderConfig::Chutes(StaticCatalogConfig {
                base_url: "https://llm.chutes.ai/v1".to_string(),
                model_table: ModelTable::default(),
            }),
        ),
        openai_compatible_seed("fireworks", "https://api.fireworks.ai/inference/v1"),
        openai_compatible_seed("together", "https://api.together.xyz/v1"),
        openai_compatible_seed("groq", "https://api.groq.com/openai/v1"),
        openai_compatible_seed("cerebras", "https://api.cerebras.ai/v1"),
        openai_compatible_seed("xai", "https://api.x.ai/v1"),
        openai_compatible_seed("novita", "https://api.novita.ai/v3/openai"),
        openai_compatible_seed("nebius", "https://api.studio.nebius.ai/v1"),
        openai_compatible_seed("vercel_ai_gateway", "https://ai-gateway.vercel.sh/v1"),
        openai_compatible_seed("featherless", "https://api.featherless.ai/v1"),
        openai_compatible_seed("near", "https://api.near.ai/v1"),
        openai_compatible_seed("aimo", "https://api.aimo.ai/v1"),
    ]
}

fn openai_compatible_seed(name: &'static str, base_url: &str) -> (&'static str, ProviderConfig) {
    use gateway_provider_core::OpenAICompatibleConfig;
    (
        name,
        ProviderConfig::OpenAICompatible(OpenAICompatibleConfig {
            id: name.to_string(),
            base_url: base_url.to_string(),
            auth_header_name: "authorization".to_string(),
            auth_header_prefix: "Bearer ".to_string(),
            model_table: None,
        }),
    )
}

/// Persists any provider row missing from storage, then inserts a credential
/// for every gateway whose `<GATEWAY>_API_KEY` env var (or, for Vertex,
/// `GOOGLE_VERTEX_CREDENTIALS_JSON`) is set. Gateways left without a
/// credential stay registered (so listing still shows them) but the router
/// will never get a credential to dispatch through.
async fn seed_providers(storage: &SeaOrmStorage, seeds: &[(&'static str, ProviderConfig)], credentials: &CredentialPool) -> anyhow::Result<()> {
    let existing: HashSet<String> = storage.load_snapshot().await.context("load snapshot")?.providers.into_iter().map(|p| p.name).collect();

    for (name, config) in seeds {
        if !existing.contains(*name) {
            let config_json = serde_json::to_value(config).context("serialize provider config")?;
            storage.upsert_provider(name, &config_json, true).await.with_context(|| format!("seed provider {name}"))?;
        }

        if *name == "vertex" {
            if let Ok(raw) = std::env::var("GOOGLE_VERTEX_CREDENTIALS_JSON") {
                let parsed: serde_json::Value = serde_json::from_str(&raw).with_context(|| "parse GOOGLE_VERTEX_CREDENTIALS_JSON")?;
                let project_id = parsed
                    .get("project_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| std::env::var("GOOGLE_PROJECT_ID").ok())
                    .context("vertex credential missing project_id")?;
                let credential = Credential::ServiceAccount(gateway_provider_core::ServiceAccountCredential {
                    project_id,
                    client_email: field(&parsed, "client_email")?,
                    private_key: field(&parsed, "private_key")?,
                    private_key_id: field(&parsed, "private_key_id")?,
                    token_uri: parsed.get("token_uri").and_then(|v| v.as_str()).map(str::to_string),
                    access_token: None,
                    expires_at: None,
                });
                let id = insert_credential_row(storage, name, &credential).await?;
                credentials.insert(*name, id, credential).await;
            }
            continue;
        }

        let env_var = format!("{}_API_KEY", name.to_ascii_uppercase());
        if let Ok(api_key) = std::env::var(&env_var) {
            let credential = Credential::ApiKey(gateway_provider_core::ApiKeyCredential { api_key });
            let id = insert_credential_row(storage, name, &credential).await?;
            credentials.insert(*name, id, credential).await;
        }
    }
    Ok(())
}

fn field(value: &serde_json::Value, key: &str) -> anyhow::Result<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .with_context(|| format!("vertex credential missing {key}"))
}

async fn insert_credential_row(storage: &SeaOrmStorage, provider_name: &str, credential: &Credential) -> anyhow::Result<i64> {
    let secret_json = serde_json::to_value(credential).context("serialize credential")?;
    let id = storage
        .insert_credential(provider_name, None, &serde_json::json!({}), &secret_json, true)
        .await
        .with_context(|| format!("insert credential for {provider_name}"))?;
    Ok(id)
}

fn hash_admin_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}
