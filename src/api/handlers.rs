use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::extract_client_ip;
use crate::auth::{bearer_token, AuthService, IssuedToken};
use crate::config::AnalyticsConfig;
use crate::error::ApiError;
use crate::links::{CreatedLink, LinkService};
use crate::storage::Storage;

pub struct AppState {
    pub links: Arc<LinkService>,
    pub auth: Arc<AuthService>,
    pub storage: Arc<dyn Storage>,
    /// Proxy trust settings used to find the caller's address
    pub proxy_config: Arc<AnalyticsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ShortenRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub custom_slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "name": "KinterCut API" }))
}

/// Public shorten endpoint. A valid admin token makes the link permanent.
pub async fn shorten(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedLink>), ApiError> {
    let Json(payload) = payload?;
    let caller = state.auth.try_verify(bearer_token(&headers));

    let created = state
        .links
        .create(&payload.url, payload.custom_slug.as_deref(), &caller)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<IssuedToken>, ApiError> {
    let Json(payload) = payload?;
    let ip = extract_client_ip(&headers, addr.ip(), &state.proxy_config);
    let user_agent = user_agent(&headers);

    let issued = state
        .auth
        .login(&payload.username, &payload.password, &ip.to_string(), user_agent)
        .await?;

    Ok(Json(issued))
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}
