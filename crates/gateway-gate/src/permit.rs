use gateway_storage::Storage;

/// Whether the admitted request actually ran. `Aborted` rolls back the
/// trial-request reservation taken at admit time; `Completed` leaves it
/// committed (accounting has already recorded the real usage by then).
pub enum ReleaseOutcome {
    Completed,
    Aborted,
}

/// Returned by `Gate::admit`. Holds everything that needs to be undone when
/// the request ends: the concurrency slot (always released, via `Drop`) and
/// the trial-request reservation (released only when the request never ran).
pub struct Permit {
    pub api_key_id: i64,
    trial_reservation: Option<i64>,
    _concurrency: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl Permit {
    pub(crate) fn new(
        api_key_id: i64,
        concurrency: tokio::sync::OwnedSemaphorePermit,
        trial_reservation: Option<i64>,
    ) -> Self {
        Self {
            api_key_id,
            trial_reservation,
            _concurrency: Some(concurrency),
        }
    }

    /// Releases the concurrency slot unconditionally. Rolls back the trial
    /// reservation only on `Aborted`; window rate-limit counters are never
    /// rolled back regardless of outcome.
    pub async fn release(mut self, storage: &dyn Storage, outcome: ReleaseOutcome) -> Result<(), gateway_storage::StorageError> {
        if let (ReleaseOutcome::Aborted, Some(trial_id)) = (outcome, self.trial_reservation.take()) {
            storage.release_trial_request(trial_id).await?;
        }
        Ok(())
    }
}
