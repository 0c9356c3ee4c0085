//! `GET /health`: liveness plus a best-effort reachability probe of the
//! store and cache, never gated behind auth.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_reachable: bool,
    pub cache_reachable: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store_reachable = state.storage.load_global_config().await.is_ok();
    // Rate-limit windows live in-process (see `gateway-gate::RateLimiter`);
    // there is no separate cache service to probe today, so this tracks
    // whether a `cache_url` is configured at all.
    let cache_reachable = state.global.load().cache_url.is_some();

    let status = if store_reachable { "healthy" } else { "degraded" };
    Json(HealthResponse {
        status,
        store_reachable,
        cache_reachable,
    })
    .into_response()
}
