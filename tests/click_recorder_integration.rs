//! Click recorder integration tests
//!
//! Exercise the background pool with a scripted geolocation service: slow and
//! failing lookups, caching across clicks, and draining on shutdown.

use anyhow::{bail, Result};
use async_trait::async_trait;
use kintercut::analytics::{process_click, ClickJob, ClickRecorder, GeoLocation, GeoLookup, GeoResolver};
use kintercut::models::NewLink;
use kintercut::storage::{SqliteStorage, Storage};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers per address: `10.x` style private ranges never reach here,
/// `192.0.2.1` fails, `192.0.2.2` hangs, anything else resolves to Japan.
struct ScriptedLookup {
    calls: AtomicUsize,
}

impl ScriptedLookup {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GeoLookup for ScriptedLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match ip.to_string().as_str() {
            "192.0.2.1" => bail!("service returned status fail"),
            "192.0.2.2" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                bail!("unreachable")
            }
            _ => Ok(GeoLocation {
                country: "Japan".to_string(),
                region: "Tokyo".to_string(),
                city: "Tokyo".to_string(),
            }),
        }
    }
}

async fn storage_with_link() -> (Arc<dyn Storage>, i64) {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    let link = storage
        .create_link(&NewLink {
            slug: "recorded".to_string(),
            original_url: "https://example.com".to_string(),
            created_by_admin: true,
            created_at: 1_700_000_000,
            expires_at: None,
        })
        .await
        .unwrap();
    (Arc::new(storage), link.id)
}

fn resolver(lookup: Arc<ScriptedLookup>) -> GeoResolver {
    GeoResolver::new(
        lookup,
        Duration::from_secs(3600),
        1_000,
        Duration::from_millis(200),
    )
}

#[tokio::test]
async fn test_locations_by_address_class() {
    let (storage, link_id) = storage_with_link().await;
    let lookup = ScriptedLookup::new();
    let geo = resolver(Arc::clone(&lookup));

    for ip in ["203.0.113.50", "192.168.1.20", "192.0.2.1", "192.0.2.2", "garbage"] {
        process_click(storage.as_ref(), &geo, ClickJob::new(link_id, ip, "ua")).await;
    }

    let stats = storage.click_stats(link_id, 10, 10).await.unwrap();
    assert_eq!(stats.total_clicks, 5);

    let country_of = |ip: &str| {
        stats
            .recent_clicks
            .iter()
            .find(|c| c.ip_address == ip)
            .map(|c| c.country.clone())
            .unwrap()
    };
    assert_eq!(country_of("203.0.113.50"), "Japan");
    assert_eq!(country_of("192.168.1.20"), "Local");
    assert_eq!(country_of("192.0.2.1"), "Unknown");
    assert_eq!(country_of("192.0.2.2"), "Unknown");
    assert_eq!(country_of("garbage"), "Unknown");

    // Private and unparseable addresses never reach the service
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_repeat_visitors_hit_the_cache() {
    let (storage, link_id) = storage_with_link().await;
    let lookup = ScriptedLookup::new();
    let recorder = ClickRecorder::spawn(Arc::clone(&storage), resolver(Arc::clone(&lookup)), 100, 1);

    for _ in 0..5 {
        recorder.record(ClickJob::new(link_id, "198.51.100.4", "ua"));
    }
    recorder.shutdown().await;

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.clicks, 5);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_lookups_are_not_cached() {
    let (storage, link_id) = storage_with_link().await;
    let lookup = ScriptedLookup::new();
    let geo = resolver(Arc::clone(&lookup));

    for _ in 0..3 {
        process_click(storage.as_ref(), &geo, ClickJob::new(link_id, "192.0.2.1", "ua")).await;
    }

    assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
    let stats = storage.click_stats(link_id, 10, 10).await.unwrap();
    assert_eq!(stats.total_clicks, 3);
}

#[tokio::test]
async fn test_shutdown_drains_slow_lookups() {
    let (storage, link_id) = storage_with_link().await;
    let lookup = ScriptedLookup::new();
    let recorder = ClickRecorder::spawn(Arc::clone(&storage), resolver(lookup), 100, 2);

    for i in 0..10 {
        // Half of the clicks hang until the lookup timeout fires
        let ip = if i % 2 == 0 { "192.0.2.2" } else { "203.0.113.77" };
        recorder.record(ClickJob::new(link_id, ip, "ua"));
    }
    recorder.shutdown().await;

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.clicks, 10);

    let stats = storage.click_stats(link_id, 100, 10).await.unwrap();
    assert_eq!(stats.total_clicks, 10);
    assert_eq!(stats.unique_ips, 2);
}

#[tokio::test]
async fn test_clicks_after_shutdown_are_dropped() {
    let (storage, link_id) = storage_with_link().await;
    let recorder = ClickRecorder::spawn(
        Arc::clone(&storage),
        resolver(ScriptedLookup::new()),
        100,
        1,
    );

    recorder.record(ClickJob::new(link_id, "127.0.0.1", "ua"));
    recorder.shutdown().await;

    recorder.record(ClickJob::new(link_id, "127.0.0.1", "ua"));
    // A second shutdown is a no-op
    recorder.shutdown().await;

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.clicks, 1);
}

#[tokio::test]
async fn test_user_agent_is_truncated() {
    let (storage, link_id) = storage_with_link().await;
    let geo = resolver(ScriptedLookup::new());

    let long_ua = "x".repeat(2_000);
    process_click(storage.as_ref(), &geo, ClickJob::new(link_id, "127.0.0.1", &long_ua)).await;

    let stats = storage.click_stats(link_id, 1, 1).await.unwrap();
    assert_eq!(stats.recent_clicks[0].user_agent.len(), 512);
}
