use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::events::{Event, OperationalEvent, UnavailableStartEvent};
use crate::{Credential, CredentialId, CredentialState, EventHub, UnavailableReason};

use super::unavailable_queue::UnavailableQueue;

#[derive(Debug, Clone)]
pub enum AcquireError {
    ProviderUnknown,
    NoActiveCredentials,
}

/// Per-gateway pool of credentials (API keys, or for Vertex a service
/// account) with cooldown-based unavailability. `acquire` always returns the
/// first Active credential for a gateway; a background task flips
/// `Unavailable` entries back to `Active` once their cooldown elapses.
pub struct CredentialPool {
    creds: RwLock<HashMap<CredentialId, Credential>>,
    by_provider: RwLock<HashMap<String, Vec<CredentialId>>>,
    states: Arc<RwLock<HashMap<CredentialId, CredentialState>>>,
    events: EventHub,
    queue: Arc<UnavailableQueue>,
}

impl CredentialPool {
    pub fn new(events: EventHub) -> Self {
        let states = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(UnavailableQueue::new());
        queue
            .clone()
            .spawn_recover_task(states.clone(), events.clone());
        Self {
            creds: RwLock::new(HashMap::new()),
            by_provider: RwLock::new(HashMap::new()),
            states,
            events,
            queue,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn insert(&self, provider: impl Into<String>, id: CredentialId, cred: Credential) {
        let provider = provider.into();
        self.creds.write().await.insert(id, cred);
        // Avoid duplicated IDs in the provider index; insert() can be called on enable toggles.
        let mut by_provider = self.by_provider.write().await;
        let ids = by_provider.entry(provider).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        self.states
            .write()
            .await
            .entry(id)
            .or_insert(CredentialState::Active);
    }

    pub async fn update_credential(&self, id: CredentialId, cred: Credential) {
        self.creds.write().await.insert(id, cred);
    }

    pub async fn set_enabled(&self, provider: &str, id: CredentialId, enabled: bool) {
        if enabled {
            let mut by_provider = self.by_provider.write().await;
            let ids = by_provider.entry(provider.to_string()).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
            drop(by_provider);

            // If the credential was never inserted before, keep state as Active.
            self.states
                .write()
                .await
                .entry(id)
                .or_insert(CredentialState::Active);
        } else {
            let mut by_provider = self.by_provider.write().await;
            if let Some(ids) = by_provider.get_mut(provider) {
                ids.retain(|x| *x != id);
            }
        }
    }

    pub async fn acquire(
        &self,
        provider: &str,
    ) -> Result<(CredentialId, Credential), AcquireError> {
        let ids = {
            let guard = self.by_provider.read().await;
            guard.get(provider).cloned()
        };
        let Some(ids) = ids else {
            return Err(AcquireError::ProviderUnknown);
        };

        let states = self.states.read().await;
        let chosen = ids
            .into_iter()
            .find(|id| matches!(states.get(id), Some(CredentialState::Active)));
        drop(states);

        let Some(id) = chosen else {
            return Err(AcquireError::NoActiveCredentials);
        };
        let cred = self
            .creds
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AcquireError::NoActiveCredentials)?;
        Ok((id, cred))
    }

    pub async fn mark_unavailable(
        &self,
        credential_id: CredentialId,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let until_instant = Instant::now() + duration;
        {
            let mut guard = self.states.write().await;
            guard.insert(
                credential_id,
                CredentialState::Unavailable {
                    until: until_instant,
                    reason,
                },
            );
        }
        self.queue.push(until_instant, credential_id).await;

        let until_wall = SystemTime::now()
            .checked_add(duration)
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }

    pub async fn state(&self, credential_id: CredentialId) -> Option<CredentialState> {
        self.states.read().await.get(&credential_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_skips_unavailable_credentials() {
        let pool = CredentialPool::new(EventHub::new(16));
        pool.insert(
            "openrouter",
            1,
            Credential::ApiKey(crate::ApiKeyCredential {
                api_key: "a".into(),
            }),
        )
        .await;
        pool.insert(
            "openrouter",
            2,
            Credential::ApiKey(crate::ApiKeyCredential {
                api_key: "b".into(),
            }),
        )
        .await;

        pool.mark_unavailable(1, Duration::from_secs(30), UnavailableReason::RateLimit)
            .await;

        let (id, _cred) = pool.acquire("openrouter").await.unwrap();
        assert_eq!(id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_credential_recovers_after_cooldown() {
        let pool = CredentialPool::new(EventHub::new(16));
        pool.insert(
            "openrouter",
            1,
            Credential::ApiKey(crate::ApiKeyCredential {
                api_key: "a".into(),
            }),
        )
        .await;
        pool.mark_unavailable(1, Duration::from_millis(10), UnavailableReason::Timeout)
            .await;

        assert!(pool.acquire("openrouter").await.is_err());

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        // Give the background recovery task a chance to run.
        for _ in 0..10 {
            if pool.acquire("openrouter").await.is_ok() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("credential did not recover after cooldown");
    }

    #[tokio::test]
    async fn unknown_provider_is_reported_distinctly() {
        let pool = CredentialPool::new(EventHub::new(16));
        assert!(matches!(
            pool.acquire("nobody").await,
            Err(AcquireError::ProviderUnknown)
        ));
    }
}
