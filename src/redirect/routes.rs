use axum::{routing::get, Router};
use std::sync::Arc;

use crate::api::trace;

use super::handlers::{
    expired, health_check, not_found, redirect_url, RedirectState, EXPIRED_PATH, NOT_FOUND_PATH,
};

pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(EXPIRED_PATH, get(expired))
        .route(NOT_FOUND_PATH, get(not_found))
        .route("/{slug}", get(redirect_url))
        .with_state(state)
        .layer(trace::layer())
}
