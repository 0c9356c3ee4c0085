use std::time::Duration;

use gateway_provider_core::ProviderErrorKind;
use rand::Rng;

const RATE_LIMIT_BASE_MS: [u64; 2] = [500, 1000];
const RATE_LIMIT_JITTER: f64 = 0.25;

/// What the dispatch loop should do after one attempt failed, given how many
/// times this same gateway has already been retried and whether the request
/// is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Retry the same gateway after the given backoff.
    RetrySame(Duration),
    NextGateway,
    Stop,
}

/// The retry/backoff table: classification, attempts already spent on this
/// gateway, and whether the request streams decide whether to retry in
/// place, fail over to the next candidate, or stop and surface the error.
pub fn decide(kind: ProviderErrorKind, attempts_on_gateway: u32, streaming: bool) -> Action {
    match kind {
        ProviderErrorKind::Auth | ProviderErrorKind::NotFound => Action::NextGateway,
        ProviderErrorKind::RateLimited => {
            if attempts_on_gateway < 2 {
                Action::RetrySame(rate_limit_backoff(attempts_on_gateway))
            } else {
                Action::NextGateway
            }
        }
        ProviderErrorKind::BadRequest
        | ProviderErrorKind::ContextTooLong
        | ProviderErrorKind::ContentFilter => Action::Stop,
        ProviderErrorKind::Upstream5xx | ProviderErrorKind::Network | ProviderErrorKind::Timeout => {
            if !streaming && attempts_on_gateway < 1 {
                Action::RetrySame(Duration::ZERO)
            } else {
                Action::NextGateway
            }
        }
        ProviderErrorKind::Unknown => Action::NextGateway,
    }
}

fn rate_limit_backoff(attempts_on_gateway: u32) -> Duration {
    let base_ms = RATE_LIMIT_BASE_MS[attempts_on_gateway as usize % RATE_LIMIT_BASE_MS.len()];
    let jitter = rand::rng().random_range(-RATE_LIMIT_JITTER..=RATE_LIMIT_JITTER);
    let millis = (base_ms as f64 * (1.0 + jitter)).max(0.0);
    Duration::from_millis(millis as u64)
}

/// Preference order used to pick the most informative error to surface once
/// the attempt budget is exhausted: a rate limit tells the caller more than
/// an opaque 5xx, which tells them more than a bare network failure.
fn informativeness(kind: ProviderErrorKind) -> u8 {
    match kind {
        ProviderErrorKind::RateLimited => 4,
        ProviderErrorKind::Upstream5xx => 3,
        ProviderErrorKind::Timeout => 2,
        ProviderErrorKind::Network => 1,
        _ => 0,
    }
}

/// Picks the most informative of two failure kinds seen across attempts, the
/// later one winning ties so the most recent evidence is preferred.
pub fn most_informative(current: ProviderErrorKind, candidate: ProviderErrorKind) -> ProviderErrorKind {
    if informativeness(candidate) >= informativeness(current) {
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_not_found_always_fail_over() {
        assert_eq!(decide(ProviderErrorKind::Auth, 0, false), Action::NextGateway);
        assert_eq!(decide(ProviderErrorKind::NotFound, 0, true), Action::NextGateway);
    }

    #[test]
    fn rate_limited_retries_same_gateway_twice_then_fails_over() {
        assert!(matches!(
            decide(ProviderErrorKind::RateLimited, 0, false),
            Action::RetrySame(_)
        ));
        assert!(matches!(
            decide(ProviderErrorKind::RateLimited, 1, false),
            Action::RetrySame(_)
        ));
        assert_eq!(
            decide(ProviderErrorKind::RateLimited, 2, false),
            Action::NextGateway
        );
    }

    #[test]
    fn bad_request_and_content_filter_always_stop() {
        assert_eq!(decide(ProviderErrorKind::BadRequest, 0, false), Action::Stop);
        assert_eq!(decide(ProviderErrorKind::ContentFilter, 0, false), Action::Stop);
        assert_eq!(decide(ProviderErrorKind::ContextTooLong, 0, true), Action::Stop);
    }

    #[test]
    fn transient_upstream_failures_retry_once_only_when_not_streaming() {
        assert!(matches!(
            decide(ProviderErrorKind::Upstream5xx, 0, false),
            Action::RetrySame(_)
        ));
        assert_eq!(
            decide(ProviderErrorKind::Upstream5xx, 1, false),
            Action::NextGateway
        );
        assert_eq!(
            decide(ProviderErrorKind::Network, 0, true),
            Action::NextGateway
        );
    }

    #[test]
    fn most_informative_prefers_rate_limited_over_everything() {
        assert_eq!(
            most_informative(ProviderErrorKind::Network, ProviderErrorKind::RateLimited),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            most_informative(ProviderErrorKind::RateLimited, ProviderErrorKind::Unknown),
            ProviderErrorKind::RateLimited
        );
    }

    #[test]
    fn most_informative_prefers_later_evidence_on_ties() {
        assert_eq!(
            most_informative(ProviderErrorKind::Unknown, ProviderErrorKind::Unknown),
            ProviderErrorKind::Unknown
        );
    }
}
