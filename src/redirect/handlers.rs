use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::analytics::{extract_client_ip, ClickJob, ClickRecorder};
use crate::api::handlers::user_agent;
use crate::config::{describe_duration, AnalyticsConfig};
use crate::error::ApiError;
use crate::links::{LinkService, Resolution};

pub const EXPIRED_PATH: &str = "/expired";
pub const NOT_FOUND_PATH: &str = "/not-found";

pub struct RedirectState {
    pub links: Arc<LinkService>,
    pub recorder: ClickRecorder,
    pub proxy_config: Arc<AnalyticsConfig>,
    pub public_ttl: Duration,
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "name": "KinterCut" }))
}

/// Redirect to the original URL and queue the click for recording.
///
/// The response never waits on geolocation or click persistence.
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(slug): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    match state.links.resolve(&slug).await {
        Ok(Resolution::Redirect(link)) => {
            let ip = extract_client_ip(&headers, addr.ip(), &state.proxy_config);
            state
                .recorder
                .record(ClickJob::new(link.id, ip.to_string(), user_agent(&headers)));

            Redirect::temporary(&link.original_url).into_response()
        }
        Ok(Resolution::Expired(link)) => {
            debug!(slug = %slug, link_id = link.id, "Expired link requested");
            Redirect::temporary(EXPIRED_PATH).into_response()
        }
        Ok(Resolution::NotFound) => {
            debug!(slug = %slug, "Unknown slug requested");
            Redirect::temporary(NOT_FOUND_PATH).into_response()
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

pub async fn expired(State(state): State<Arc<RedirectState>>) -> impl IntoResponse {
    (
        StatusCode::GONE,
        Json(json!({
            "error": "This link has expired",
            "message": format!(
                "The short link you are trying to access has expired. Public links expire after {}.",
                describe_duration(state.public_ttl)
            ),
        })),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Link not found",
            "message": "The short link you are trying to access does not exist.",
        })),
    )
}
