//! Lightweight authentication for account-management endpoints (balance,
//! transaction history, key CRUD): credential resolution only, step 1 of
//! `Gate::admit`, reused directly rather than running the full admission
//! pipeline: these reads/writes aren't billable requests and shouldn't
//! consume rate-limit budget or a trial/credit reservation, so going through
//! `Gate::admit` itself would wrongly lock out a user checking their balance
//! with a zero balance.

use axum::http::{header, HeaderMap};
use gateway_common::Environment;
use gateway_gate::{extract_bearer, hash_token, parse_token};
use gateway_storage::{ApiKeyRow, Storage, UserRow};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(UserRow, ApiKeyRow), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let token = extract_bearer(token).ok_or(ApiError::new(ErrorCode::Unauthenticated, "missing bearer token"))?;

    let parsed = parse_token(token).ok_or(ApiError::new(ErrorCode::Unauthenticated, "malformed token"))?;
    if parsed.environment != state.deployment_environment {
        return Err(ApiError::new(ErrorCode::Forbidden, "key environment mismatch"));
    }

    let key_hash = hash_token(token, &state.global.load().key_hash_salt);
    let api_key = state
        .storage
        .find_api_key_by_hash(&key_hash)
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "storage error").with_detail(err.to_string()))?
        .ok_or(ApiError::new(ErrorCode::Unauthenticated, "unknown key"))?;
    if !api_key.active {
        return Err(ApiError::new(ErrorCode::Unauthenticated, "key revoked"));
    }
    if let Some(expires_at) = api_key.expires_at
        && expires_at <= time::OffsetDateTime::now_utc()
    {
        return Err(ApiError::new(ErrorCode::Unauthenticated, "key expired"));
    }

    let user = state
        .storage
        .get_user(api_key.user_id)
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "storage error").with_detail(err.to_string()))?
        .ok_or(ApiError::new(ErrorCode::Unauthenticated, "unknown user"))?;
    if !user.active {
        return Err(ApiError::new(ErrorCode::Forbidden, "user inactive"));
    }

    Ok((user, api_key))
}

/// `gw_{env}_{opaque}`, generated fresh for a new key and never stored in
/// plaintext: only the salted hash (`hash_token`) is persisted.
pub fn generate_token(environment: Environment) -> String {
    use rand::distr::Alphanumeric;
    use rand::Rng;

    const OPAQUE_LEN: usize = 32;
    let opaque: String = rand::rng().sample_iter(&Alphanumeric).take(OPAQUE_LEN).map(char::from).collect();
    format!("gw_{}_{}", environment.as_prefix(), opaque)
}
