//! Redirect integration tests
//!
//! Verify redirect outcomes for live, expired and unknown slugs, and that
//! clicks reach storage through the background recorder.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use kintercut::analytics::{ClickRecorder, GeoLocation, GeoLookup, GeoResolver};
use kintercut::config::{AnalyticsConfig, TrustedProxyMode};
use kintercut::links::LinkService;
use kintercut::models::NewLink;
use kintercut::redirect::{create_redirect_router, RedirectState};
use kintercut::storage::{SqliteStorage, Storage};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PUBLIC_TTL_SECS: i64 = 7 * 24 * 3600;

struct StaticLookup;

#[async_trait]
impl GeoLookup for StaticLookup {
    async fn lookup(&self, _ip: IpAddr) -> Result<GeoLocation> {
        Ok(GeoLocation {
            country: "Germany".to_string(),
            region: "Berlin".to_string(),
            city: "Berlin".to_string(),
        })
    }
}

async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

struct TestApp {
    router: Router,
    storage: Arc<dyn Storage>,
    recorder: ClickRecorder,
}

async fn create_test_app(proxy_config: AnalyticsConfig) -> TestApp {
    let storage = create_test_storage().await;
    let geo = GeoResolver::new(
        Arc::new(StaticLookup),
        Duration::from_secs(60),
        100,
        Duration::from_secs(1),
    );
    let recorder = ClickRecorder::spawn(Arc::clone(&storage), geo, 100, 2);

    let state = Arc::new(RedirectState {
        links: Arc::new(LinkService::new(
            Arc::clone(&storage),
            PUBLIC_TTL_SECS,
            "http://localhost:3000",
        )),
        recorder: recorder.clone(),
        proxy_config: Arc::new(proxy_config),
        public_ttl: Duration::from_secs(PUBLIC_TTL_SECS as u64),
    });

    let router = create_redirect_router(state)
        .layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 9], 50000))));

    TestApp {
        router,
        storage,
        recorder,
    }
}

async fn insert_link(storage: &Arc<dyn Storage>, slug: &str, expires_at: Option<i64>) -> i64 {
    storage
        .create_link(&NewLink {
            slug: slug.to_string(),
            original_url: format!("https://example.com/{slug}"),
            created_by_admin: expires_at.is_none(),
            created_at: chrono::Utc::now().timestamp() - 10,
            expires_at,
        })
        .await
        .unwrap()
        .id
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::USER_AGENT, "integration-test/1.0")
        .body(Body::empty())
        .unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn test_redirect_active_link() {
    let app = create_test_app(AnalyticsConfig::default()).await;
    insert_link(&app.storage, "live", None).await;

    let response = app.router.clone().oneshot(get("/live")).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "https://example.com/live");
}

#[tokio::test]
async fn test_redirect_records_click_with_location() {
    let app = create_test_app(AnalyticsConfig::default()).await;
    let id = insert_link(&app.storage, "tracked", None).await;

    for _ in 0..3 {
        let response = app.router.clone().oneshot(get("/tracked")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    app.recorder.shutdown().await;

    let link = app.storage.get_link(id).await.unwrap().unwrap();
    assert_eq!(link.clicks, 3);

    let stats = app.storage.click_stats(id, 10, 10).await.unwrap();
    assert_eq!(stats.total_clicks, 3);
    assert_eq!(stats.unique_ips, 1);
    assert_eq!(stats.top_countries[0].country, "Germany");

    let click = &stats.recent_clicks[0];
    assert_eq!(click.ip_address, "203.0.113.9");
    assert_eq!(click.user_agent, "integration-test/1.0");
    assert_eq!(click.city, "Berlin");
}

#[tokio::test]
async fn test_redirect_uses_forwarded_address_behind_cloudflare() {
    let app = create_test_app(AnalyticsConfig {
        trusted_proxy_mode: TrustedProxyMode::Cloudflare,
        ..AnalyticsConfig::default()
    })
    .await;
    let id = insert_link(&app.storage, "proxied", None).await;

    let request = Request::builder()
        .uri("/proxied")
        .header("CF-Connecting-IP", "198.51.100.23")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    app.recorder.shutdown().await;

    let stats = app.storage.click_stats(id, 10, 10).await.unwrap();
    assert_eq!(stats.recent_clicks.len(), 1);
    assert_eq!(stats.recent_clicks[0].ip_address, "198.51.100.23");
    assert_eq!(stats.recent_clicks[0].user_agent, "");
}

#[tokio::test]
async fn test_expired_link_redirects_to_expired_page() {
    let app = create_test_app(AnalyticsConfig::default()).await;
    let id = insert_link(
        &app.storage,
        "stale",
        Some(chrono::Utc::now().timestamp() - 1),
    )
    .await;

    let response = app.router.clone().oneshot(get("/stale")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/expired");

    app.recorder.shutdown().await;

    // Expired links are not counted
    let link = app.storage.get_link(id).await.unwrap().unwrap();
    assert_eq!(link.clicks, 0);
}

#[tokio::test]
async fn test_unknown_slug_redirects_to_not_found_page() {
    let app = create_test_app(AnalyticsConfig::default()).await;

    let response = app.router.clone().oneshot(get("/nope123")).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/not-found");
}

#[tokio::test]
async fn test_slug_lookup_is_case_sensitive() {
    let app = create_test_app(AnalyticsConfig::default()).await;
    insert_link(&app.storage, "AbCdEfG", None).await;

    let response = app.router.clone().oneshot(get("/abcdefg")).await.unwrap();
    assert_eq!(location(&response), "/not-found");

    let response = app.router.clone().oneshot(get("/AbCdEfG")).await.unwrap();
    assert_eq!(location(&response), "https://example.com/AbCdEfG");
}

#[tokio::test]
async fn test_expired_page_describes_ttl() {
    let app = create_test_app(AnalyticsConfig::default()).await;

    let response = app.router.clone().oneshot(get("/expired")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "This link has expired");
    assert!(body["message"].as_str().unwrap().contains("7 days"));
}

#[tokio::test]
async fn test_not_found_page() {
    let app = create_test_app(AnalyticsConfig::default()).await;

    let response = app.router.clone().oneshot(get("/not-found")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app(AnalyticsConfig::default()).await;

    let response = app.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_redirects_are_all_counted() {
    let app = create_test_app(AnalyticsConfig::default()).await;
    let id = insert_link(&app.storage, "busy", None).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            router.oneshot(get("/busy")).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::TEMPORARY_REDIRECT);
    }

    app.recorder.shutdown().await;

    let link = app.storage.get_link(id).await.unwrap().unwrap();
    assert_eq!(link.clicks, 20);
}
