use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::auth::{require_admin, throttle_login, LoginRateLimiter, LoginThrottle};

use super::admin::{create_link, delete_link, link_details, login_attempts, my_links, user_links};
use super::handlers::{health_check, login, shorten, AppState};
use super::trace;

pub fn create_api_router(
    state: Arc<AppState>,
    limiter: LoginRateLimiter,
    cors_origins: &[String],
) -> Router {
    let throttle = LoginThrottle {
        limiter,
        proxy_config: Arc::clone(&state.proxy_config),
    };

    let protected_routes = Router::new()
        .route("/api/admin/my", get(my_links))
        .route("/api/admin/users", get(user_links))
        .route("/api/admin/logins", get(login_attempts))
        .route("/api/admin/links", post(create_link))
        .route("/api/admin/links/{id}", get(link_details).delete(delete_link))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth),
            require_admin,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/shorten", post(shorten))
        .route(
            "/api/admin/login",
            post(login).route_layer(middleware::from_fn_with_state(throttle, throttle_login)),
        )
        .merge(protected_routes)
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(trace::layer())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}
