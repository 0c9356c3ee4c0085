//! `GET /v1/models`, `GET /catalog/models`, and `GET /v1/models/{provider}/{model}`:
//! read-only views over the catalog. None of these touch the gate; model
//! listings are not behind admission control.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_protocol::openai::models::{ModelEntry, ModelListResponse};
use serde::Deserialize;

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

const HUGGINGFACE_GATEWAY: &str = "huggingface";

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    gateway: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    include_huggingface: bool,
}

/// Triggers a fetch (or reuses a live/stale cache cell) for every gateway
/// named, then returns the merged, priority-ordered view. Listing always
/// populates rather than reading an empty cache, since nothing else in this
/// process calls `get_models` on a schedule.
async fn populate_and_merge(state: &AppState, gateways: &[String]) -> Vec<ModelEntry> {
    for gateway in gateways {
        if let Err(err) = state.catalog.get_models(gateway).await {
            tracing::warn!(gateway = %gateway, error = %err, "catalog fetch failed, serving without this gateway");
        }
    }
    state.catalog.get_all().await
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let names: Vec<String> = state.catalog.gateway_order().to_vec();
    let entries = populate_and_merge(&state, &names).await;
    let data = entries.into_iter().filter(|entry| entry.source_gateway != HUGGINGFACE_GATEWAY).collect();
    Json(ModelListResponse {
        object: "list".to_string(),
        data,
    })
    .into_response()
}

pub async fn catalog_models(State(state): State<Arc<AppState>>, Query(query): Query<CatalogQuery>) -> Response {
    let names: Vec<String> = match query.gateway.as_deref() {
        None | Some("all") => state.catalog.gateway_order().to_vec(),
        Some(name) => vec![name.to_string()],
    };
    let mut entries = populate_and_merge(&state, &names).await;
    if !query.include_huggingface {
        entries.retain(|entry| entry.source_gateway != HUGGINGFACE_GATEWAY);
    }

    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(entries.len());
    let page: Vec<ModelEntry> = entries.into_iter().skip(offset).take(limit).collect();

    Json(ModelListResponse {
        object: "list".to_string(),
        data: page,
    })
    .into_response()
}

pub async fn get_model(State(state): State<Arc<AppState>>, Path((provider, model)): Path<(String, String)>) -> Response {
    match state.catalog.get_models(&provider).await {
        Ok(entries) => {
            let id = format!("{provider}/{model}");
            match entries.iter().find(|entry| entry.id == id) {
                Some(entry) => Json(entry.clone()).into_response(),
                None => ApiError::new(ErrorCode::ModelNotFound, format!("no model {id} in gateway {provider}"))
                    .into_response_for(state.deployment_environment),
            }
        }
        Err(err) => ApiError::new(ErrorCode::ModelNotFound, format!("gateway {provider} unavailable"))
            .with_detail(err.to_string())
            .into_response_for(state.deployment_environment),
    }
}
