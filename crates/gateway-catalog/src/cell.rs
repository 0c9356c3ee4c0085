use std::sync::Arc;

use gateway_protocol::openai::models::ModelEntry;
use tokio::time::Instant;

/// A fully-populated snapshot for one gateway. Replaced atomically; never
/// mutated in place, so a reader holding an `Arc<CacheCell>` always sees a
/// consistent whole-snapshot view even if a refresh completes concurrently.
#[derive(Clone)]
pub struct CacheCell {
    pub entries: Arc<Vec<ModelEntry>>,
    pub fetched_at: Instant,
    /// Set when this snapshot is the result of a failed refresh falling
    /// back to the previous one, rather than a fresh fetch.
    pub degraded: bool,
}

impl CacheCell {
    pub fn fresh(entries: Vec<ModelEntry>, fetched_at: Instant) -> Self {
        Self {
            entries: Arc::new(entries),
            fetched_at,
            degraded: false,
        }
    }

    pub fn degraded_copy_of(previous: &CacheCell) -> Self {
        Self {
            entries: previous.entries.clone(),
            fetched_at: previous.fetched_at,
            degraded: true,
        }
    }

    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.fetched_at)
    }
}
