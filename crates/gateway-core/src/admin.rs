//! Admin-only mutations: coupon creation and manual credit grants. Gated by
//! a single shared admin secret (`x-admin-key` or `Authorization: Bearer`,
//! matched against `GlobalConfig::admin_key_hash`), not a per-user API key
//! scope, since these actions aren't something any tenant should hold a
//! scope for.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let admin_key_hash = &state.global.load().admin_key_hash;
    let provided = header_value(headers, "x-admin-key").or_else(|| {
        let auth = header_value(headers, "authorization")?;
        let auth = auth.trim();
        auth.strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .map(|token| token.trim().to_string())
    });
    match provided {
        Some(key) if &blake3::hash(key.as_bytes()).to_hex().to_string() == admin_key_hash => Ok(()),
        _ => Err(ApiError::new(ErrorCode::Unauthenticated, "missing or invalid admin key")),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    pub credit_amount: i64,
    #[serde(default = "default_max_redemptions")]
    pub max_redemptions: i32,
    #[serde(default)]
    pub expires_at_unix: Option<i64>,
}

fn default_max_redemptions() -> i32 {
    1
}

#[derive(Debug, Serialize)]
pub struct CouponResponse {
    pub id: i64,
    pub code: String,
}

pub async fn create_coupon(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(body): Json<CreateCouponRequest>) -> Response {
    if let Err(err) = require_admin(&state, &headers) {
        return err.into_response_for(state.deployment_environment);
    }

    let expires_at = match body.expires_at_unix.map(time::OffsetDateTime::from_unix_timestamp) {
        Some(Ok(ts)) => Some(ts),
        Some(Err(err)) => {
            return ApiError::bad_request(format!("invalid expires_at_unix: {err}")).into_response_for(state.deployment_environment)
        }
        None => None,
    };

    match state
        .storage
        .create_coupon(&body.code, body.credit_amount, body.max_redemptions, expires_at)
        .await
    {
        Ok(id) => Json(CouponResponse { id, code: body.code }).into_response(),
        Err(err) => ApiError::new(ErrorCode::InternalError, "failed to create coupon")
            .with_detail(err.to_string())
            .into_response_for(state.deployment_environment),
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    pub amount: i64,
    #[serde(default = "default_grant_reason")]
    pub reason: String,
}

fn default_grant_reason() -> String {
    "admin_grant".to_string()
}

#[derive(Debug, Serialize)]
pub struct GrantCreditsResponse {
    pub transaction_id: i64,
}

pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Json(body): Json<GrantCreditsRequest>,
) -> Response {
    if let Err(err) = require_admin(&state, &headers) {
        return err.into_response_for(state.deployment_environment);
    }

    match state.storage.grant_credits(user_id, body.amount, &body.reason, None).await {
        Ok(transaction_id) => Json(GrantCreditsResponse { transaction_id }).into_response(),
        Err(err) => ApiError::new(ErrorCode::InternalError, "failed to grant credits")
            .with_detail(err.to_string())
            .into_response_for(state.deployment_environment),
    }
}
