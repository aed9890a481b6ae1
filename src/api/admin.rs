//! Admin endpoints; every route here sits behind `require_admin`.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::handlers::{AppState, ShortenRequest};
use crate::auth::{Caller, Identity};
use crate::error::ApiError;
use crate::links::{CreatedLink, LinkDetails};
use crate::models::{LinkWithClicks, LoginAttempt};

pub const LOGIN_AUDIT_LIMIT: i64 = 100;
const FAILED_LOGIN_LOOKBACK_SECS: i64 = 24 * 3600;

#[derive(Serialize)]
pub struct LinkList {
    pub links: Vec<LinkWithClicks>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct LoginAudit {
    pub attempts: Vec<LoginAttempt>,
    pub failed_last_24h: i64,
}

/// Permanent links created by the admin
pub async fn my_links(State(state): State<Arc<AppState>>) -> Result<Json<LinkList>, ApiError> {
    let links = state.links.list(true).await?;
    Ok(Json(LinkList {
        total: links.len(),
        links,
    }))
}

/// Expiring links created by anonymous visitors
pub async fn user_links(State(state): State<Arc<AppState>>) -> Result<Json<LinkList>, ApiError> {
    let links = state.links.list(false).await?;
    Ok(Json(LinkList {
        total: links.len(),
        links,
    }))
}

pub async fn link_details(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<LinkDetails>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.links.details(id).await?))
}

pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    state.links.delete(id).await?;
    tracing::info!(link_id = id, admin = %identity.username, "Link deleted by admin");
    Ok(Json(json!({ "message": "Link deleted successfully" })))
}

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<ShortenRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedLink>), ApiError> {
    let Json(payload) = payload?;
    let created = state
        .links
        .create(
            &payload.url,
            payload.custom_slug.as_deref(),
            &Caller::Admin(identity),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn login_attempts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoginAudit>, ApiError> {
    let since = chrono::Utc::now().timestamp() - FAILED_LOGIN_LOOKBACK_SECS;

    let attempts = state
        .storage
        .list_login_attempts(LOGIN_AUDIT_LIMIT)
        .await
        .map_err(|e| ApiError::internal("Failed to list login attempts", &e))?;
    let failed_last_24h = state
        .storage
        .count_failed_logins_since(since)
        .await
        .map_err(|e| ApiError::internal("Failed to count failed logins", &e))?;

    Ok(Json(LoginAudit {
        attempts,
        failed_last_24h,
    }))
}
