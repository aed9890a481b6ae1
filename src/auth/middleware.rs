use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::{bearer_token, AuthService, LoginRateLimiter};
use crate::analytics::extract_client_ip;
use crate::config::{describe_duration, AnalyticsConfig};
use crate::error::ApiError;

/// Reject requests without a valid admin token; on success the `Identity`
/// is available to handlers as an extension.
pub async fn require_admin(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return ApiError::unauthorized("Authorization header required").into_response();
    };

    match auth.verify(token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Clone)]
pub struct LoginThrottle {
    pub limiter: LoginRateLimiter,
    pub proxy_config: Arc<AnalyticsConfig>,
}

/// Count every login call per client address and answer 429 once the cap is hit.
pub async fn throttle_login(
    State(throttle): State<LoginThrottle>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(request.headers(), addr.ip(), &throttle.proxy_config);

    match throttle.limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(ip = %ip, retry_after_secs = retry_after.as_secs(), "Login rate limit exceeded");
            ApiError::too_many_requests(
                format!(
                    "Too many login attempts. Your IP is blocked for {}.",
                    describe_duration(throttle.limiter.window())
                ),
                retry_after,
            )
            .into_response()
        }
    }
}
