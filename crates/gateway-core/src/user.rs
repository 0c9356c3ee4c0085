//! Account self-service: register, reset, balance, transaction history, and
//! API key CRUD. Authenticated via [`credential::authenticate`], not
//! `Gate::admit`, see that module's doc comment for why.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_storage::{ApiKeyRow, NewApiKey};
use serde::{Deserialize, Serialize};

use crate::credential::{self, authenticate};
use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

fn default_scopes() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Deserialize, Default)]
pub struct RegisterRequest {
    #[serde(default)]
    pub scopes: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IssuedKey {
    pub user_id: i64,
    pub api_key: String,
    pub environment: String,
}

pub async fn register(State(state): State<Arc<AppState>>, Json(body): Json<RegisterRequest>) -> Response {
    match do_register(&state, body).await {
        Ok(issued) => Json(issued).into_response(),
        Err(err) => err.into_response_for(state.deployment_environment),
    }
}

async fn do_register(state: &AppState, body: RegisterRequest) -> Result<IssuedKey, ApiError> {
    let user_id = state
        .storage
        .create_user()
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "failed to create user").with_detail(err.to_string()))?;

    let environment = state.deployment_environment;
    let token = credential::generate_token(environment);
    let key_hash = gateway_gate::hash_token(&token, &state.global.load().key_hash_salt);

    state
        .storage
        .insert_api_key(NewApiKey {
            user_id,
            key_hash,
            key_ciphertext: None,
            key_version: state.global.load().key_version as i32,
            environment: environment.as_prefix().to_string(),
            scopes_json: body.scopes.unwrap_or_else(default_scopes),
            is_primary: true,
            expires_at: None,
            max_requests: None,
            ip_allowlist_json: None,
            referrer_allowlist_json: None,
        })
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "failed to issue api key").with_detail(err.to_string()))?;

    Ok(IssuedKey {
        user_id,
        api_key: token,
        environment: environment.as_prefix().to_string(),
    })
}

/// Revokes the caller's current primary key and issues a new one in its
/// place. The old key is deactivated, not deleted, so usage history keeps
/// its `api_key_id` foreign key intact.
pub async fn reset(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match do_reset(&state, &headers).await {
        Ok(issued) => Json(issued).into_response(),
        Err(err) => err.into_response_for(state.deployment_environment),
    }
}

async fn do_reset(state: &AppState, headers: &HeaderMap) -> Result<IssuedKey, ApiError> {
    let (user, old_key) = authenticate(state, headers).await?;

    let environment = state.deployment_environment;
    let token = credential::generate_token(environment);
    let key_hash = gateway_gate::hash_token(&token, &state.global.load().key_hash_salt);

    state
        .storage
        .set_api_key_active(old_key.id, false)
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "failed to revoke old key").with_detail(err.to_string()))?;

    state
        .storage
        .insert_api_key(NewApiKey {
            user_id: user.id,
            key_hash,
            key_ciphertext: None,
            key_version: state.global.load().key_version as i32,
            environment: old_key.environment.clone(),
            scopes_json: old_key.scopes_json.clone(),
            is_primary: true,
            expires_at: None,
            max_requests: old_key.max_requests,
            ip_allowlist_json: old_key.ip_allowlist_json.clone(),
            referrer_allowlist_json: old_key.referrer_allowlist_json.clone(),
        })
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "failed to issue replacement key").with_detail(err.to_string()))?;

    Ok(IssuedKey {
        user_id: user.id,
        api_key: token,
        environment: environment.as_prefix().to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

pub async fn balance(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match authenticate(&state, &headers).await {
        Ok((user, _)) => Json(BalanceResponse { balance: user.credit_balance }).into_response(),
        Err(err) => err.into_response_for(state.deployment_environment),
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    limit: Option<u64>,
    offset: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionEntry {
    pub id: i64,
    pub delta: i64,
    pub reason: String,
    pub correlation_id: Option<String>,
    pub created_at: String,
}

pub async fn credit_transactions(State(state): State<Arc<AppState>>, headers: HeaderMap, Query(page): Query<PageQuery>) -> Response {
    let (user, _) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response_for(state.deployment_environment),
    };
    let limit = page.limit.unwrap_or(50).min(500);
    let offset = page.offset.unwrap_or(0);
    match state.storage.list_credit_transactions(user.id, limit, offset).await {
        Ok(rows) => {
            let entries: Vec<TransactionEntry> = rows
                .into_iter()
                .map(|row| TransactionEntry {
                    id: row.id,
                    delta: row.delta,
                    reason: row.reason,
                    correlation_id: row.correlation_id,
                    created_at: row.created_at.to_string(),
                })
                .collect();
            Json(entries).into_response()
        }
        Err(err) => ApiError::new(ErrorCode::InternalError, "failed to list transactions")
            .with_detail(err.to_string())
            .into_response_for(state.deployment_environment),
    }
}

#[derive(Debug, Serialize)]
pub struct KeySummary {
    pub id: i64,
    pub environment: String,
    pub is_primary: bool,
    pub active: bool,
    pub request_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl From<ApiKeyRow> for KeySummary {
    fn from(row: ApiKeyRow) -> Self {
        Self {
            id: row.id,
            environment: row.environment,
            is_primary: row.is_primary,
            active: row.active,
            request_count: row.request_count,
            expires_at: row.expires_at.map(|ts| ts.to_string()),
        }
    }
}

pub async fn list_keys(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let (user, _) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response_for(state.deployment_environment),
    };
    match state.storage.list_api_keys(user.id).await {
        Ok(rows) => Json(rows.into_iter().map(KeySummary::from).collect::<Vec<_>>()).into_response(),
        Err(err) => ApiError::new(ErrorCode::InternalError, "failed to list keys")
            .with_detail(err.to_string())
            .into_response_for(state.deployment_environment),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub scopes: Option<serde_json::Value>,
}

pub async fn create_key(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<CreateKeyRequest>) -> Response {
    let (user, _) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response_for(state.deployment_environment),
    };
    let environment = state.deployment_environment;
    let token = credential::generate_token(environment);
    let key_hash = gateway_gate::hash_token(&token, &state.global.load().key_hash_salt);
    let result = state
        .storage
        .insert_api_key(NewApiKey {
            user_id: user.id,
            key_hash,
            key_ciphertext: None,
            key_version: state.global.load().key_version as i32,
            environment: environment.as_prefix().to_string(),
            scopes_json: body.scopes.unwrap_or_else(default_scopes),
            is_primary: false,
            expires_at: None,
            max_requests: None,
            ip_allowlist_json: None,
            referrer_allowlist_json: None,
        })
        .await;
    match result {
        Ok(_) => Json(IssuedKey {
            user_id: user.id,
            api_key: token,
            environment: environment.as_prefix().to_string(),
        })
        .into_response(),
        Err(err) => ApiError::new(ErrorCode::InternalError, "failed to create key")
            .with_detail(err.to_string())
            .into_response_for(state.deployment_environment),
    }
}

pub async fn delete_key(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(key_id): Path<i64>) -> Response {
    let (user, _) = match authenticate(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return err.into_response_for(state.deployment_environment),
    };
    match owns_key(&state, user.id, key_id).await {
        Ok(true) => match state.storage.delete_api_key(key_id).await {
            Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
            Err(err) => ApiError::new(ErrorCode::InternalError, "failed to delete key")
                .with_detail(err.to_string())
                .into_response_for(state.deployment_environment),
        },
        Ok(false) => ApiError::new(ErrorCode::Forbidden, "key does not belong to caller").into_response_for(state.deployment_environment),
        Err(err) => err.into_response_for(state.deployment_environment),
    }
}

async fn owns_key(state: &AppState, user_id: i64, key_id: i64) -> Result<bool, ApiError> {
    let keys = state
        .storage
        .list_api_keys(user_id)
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, "storage error").with_detail(err.to_string()))?;
    Ok(keys.iter().any(|key| key.id == key_id))
}
