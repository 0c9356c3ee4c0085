pub mod admin;
pub mod bootstrap;
pub mod chat;
pub mod credential;
pub mod error;
pub mod health;
pub mod models;
pub mod responses;
pub mod sse;
pub mod state;
pub mod user;
pub mod validate;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

pub use bootstrap::{bootstrap, bootstrap_from_env, Bootstrap, CliArgs};
pub use state::AppState;

/// Every route this process serves, bound to one shared `AppState`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/responses", post(responses::create_response))
        .route("/v1/models", get(models::list_models))
        .route("/catalog/models", get(models::catalog_models))
        .route("/v1/models/{provider}/{model}", get(models::get_model))
        .route("/auth/register", post(user::register))
        .route("/auth/reset", post(user::reset))
        .route("/user/balance", get(user::balance))
        .route("/user/credits/transactions", get(user::credit_transactions))
        .route("/user/keys", get(user::list_keys).post(user::create_key))
        .route("/user/keys/{id}", delete(user::delete_key))
        .route("/health", get(health::health))
        .route("/admin/coupons", post(admin::create_coupon))
        .route("/admin/users/{id}/credits", post(admin::grant_credits))
        .with_state(state)
}
