use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use gateway_protocol::openai::models::ModelEntry;
use gateway_provider_core::{
    CatalogRefreshedEvent, CredentialPool, Event, EventHub, OperationalEvent, Provider,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cell::CacheCell;
use crate::error::{CatalogError, CatalogResult};

/// One gateway's cache cell plus the machinery that keeps it fresh:
/// `ttl` bounds a "fresh, serve directly" read, `stale_ttl` bounds a
/// "serve stale, kick off a background refresh" read. Anything older (or an
/// empty cell) blocks the caller on a fetch.
///
/// The cell itself never changes in place: it is a `CacheCell` behind
/// `ArcSwap`, replaced wholesale on every successful or degraded refresh,
/// the same atomic-snapshot-swap idiom the credential pool's sibling crate
/// uses for its auth snapshot.
pub struct GatewayCache {
    name: String,
    cell: ArcSwap<Option<CacheCell>>,
    ttl: Duration,
    stale_ttl: Duration,
    fetch_lock: Mutex<()>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayCache {
    pub fn new(name: impl Into<String>, ttl: Duration, stale_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            cell: ArcSwap::from_pointee(None),
            ttl,
            stale_ttl,
            fetch_lock: Mutex::new(()),
            background: Mutex::new(None),
        }
    }

    /// Cheap: cloning a `CacheCell` only bumps the `Arc<Vec<ModelEntry>>`
    /// refcount and copies a timestamp/bool, it never copies the entries.
    pub fn snapshot(&self) -> Option<CacheCell> {
        (*self.cell.load_full()).clone()
    }

    pub fn invalidate(&self) {
        self.cell.store(Arc::new(None));
    }

    pub async fn get_models(
        self: &Arc<Self>,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialPool>,
        events: EventHub,
    ) -> CatalogResult<Arc<Vec<ModelEntry>>> {
        let now = Instant::now();
        if let Some(cell) = self.snapshot() {
            let age = cell.age(now);
            if age <= self.ttl {
                return Ok(cell.entries);
            }
            if age <= self.stale_ttl {
                self.spawn_background_refresh(provider, credentials, events);
                return Ok(cell.entries);
            }
        }
        self.blocking_refresh(provider, credentials, events).await
    }

    /// Singleflight: skips spawning if a refresh is already running. Uses
    /// `try_lock` rather than waiting for the slot because a stale-cache
    /// reader must never block on this: at worst this round's read misses
    /// kicking off a refresh and the next stale read tries again.
    fn spawn_background_refresh(
        self: &Arc<Self>,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialPool>,
        events: EventHub,
    ) {
        let Ok(mut guard) = self.background.try_lock() else {
            return;
        };
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _ = this.refresh(provider, credentials, events).await;
        });
        *guard = Some(handle);
    }

    async fn blocking_refresh(
        self: &Arc<Self>,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialPool>,
        events: EventHub,
    ) -> CatalogResult<Arc<Vec<ModelEntry>>> {
        let _permit = self.fetch_lock.lock().await;
        if let Some(cell) = self.snapshot()
            && cell.age(Instant::now()) <= self.stale_ttl
        {
            return Ok(cell.entries);
        }
        self.refresh(provider, credentials, events).await
    }

    /// `Refresh`: force-fetches regardless of current snapshot age. A
    /// fetch failure keeps the previous snapshot intact (marked degraded)
    /// instead of clearing the cell: a transient upstream outage must not
    /// blank an otherwise-serviceable catalog.
    pub async fn refresh(
        &self,
        provider: Arc<dyn Provider>,
        credentials: Arc<CredentialPool>,
        events: EventHub,
    ) -> CatalogResult<Arc<Vec<ModelEntry>>> {
        let acquired = credentials.acquire(&self.name).await;
        let fetch_result = match acquired {
            Ok((_id, credential)) => provider.list_models(&credential).await,
            Err(_) => {
                return self
                    .fall_back_or_err(events, CatalogError::NoCredential(self.name.clone()))
                    .await;
            }
        };

        match fetch_result {
            Ok(entries) => {
                let cell = CacheCell::fresh(entries, Instant::now());
                let out = cell.entries.clone();
                self.cell.store(Arc::new(Some(cell)));
                self.emit_refreshed(&events, out.len(), false).await;
                Ok(out)
            }
            Err(err) => {
                self.fall_back_or_err(
                    events,
                    CatalogError::Upstream {
                        gateway: self.name.clone(),
                        source: err,
                    },
                )
                .await
            }
        }
    }

    async fn fall_back_or_err(
        &self,
        events: EventHub,
        err: CatalogError,
    ) -> CatalogResult<Arc<Vec<ModelEntry>>> {
        let Some(previous) = self.snapshot() else {
            return Err(err);
        };
        let degraded = CacheCell::degraded_copy_of(&previous);
        let out = degraded.entries.clone();
        self.cell.store(Arc::new(Some(degraded)));
        self.emit_refreshed(&events, out.len(), true).await;
        Ok(out)
    }

    async fn emit_refreshed(&self, events: &EventHub, entry_count: usize, degraded: bool) {
        events
            .emit(Event::Operational(OperationalEvent::CatalogRefreshed(
                CatalogRefreshedEvent {
                    at: std::time::SystemTime::now(),
                    gateway: self.name.clone(),
                    entry_count,
                    degraded,
                },
            )))
            .await;
    }
}
