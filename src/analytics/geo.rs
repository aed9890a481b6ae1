//! IP geolocation over an HTTP lookup service with a bounded TTL cache
//!
//! Resolution never fails: private and loopback addresses map to the `Local`
//! sentinel without a network call, and every lookup failure (timeout, non-200,
//! bad JSON, `status != "success"`) maps to `Unknown`. Only successful lookups
//! are cached.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::analytics::models::GeoLocation;
use crate::config::AnalyticsConfig;

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation>;
}

/// Lookup against an ip-api.com compatible endpoint
pub struct IpApiLookup {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "regionName")]
    region_name: String,
    #[serde(default)]
    city: String,
}

impl IpApiLookup {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build geolocation HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoLocation> {
        let url = format!(
            "{}/json/{}?fields=status,country,regionName,city",
            self.base_url, ip
        );

        let body: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if body.status != "success" {
            bail!("geolocation service answered status '{}'", body.status);
        }

        Ok(GeoLocation {
            country: body.country,
            region: body.region_name,
            city: body.city,
        })
    }
}

/// Returns true for addresses that never leave the local network.
pub fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_local_ip(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[derive(Clone)]
pub struct GeoResolver {
    lookup: Arc<dyn GeoLookup>,
    cache: Cache<IpAddr, GeoLocation>,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(
        lookup: Arc<dyn GeoLookup>,
        cache_ttl: Duration,
        max_entries: u64,
        timeout: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(cache_ttl)
            .build();

        Self {
            lookup,
            cache,
            timeout,
        }
    }

    /// Resolver backed by the configured HTTP service
    pub fn from_config(config: &AnalyticsConfig) -> Result<Self> {
        let lookup = IpApiLookup::new(&config.geo_api_url, config.geo_timeout())?;
        Ok(Self::new(
            Arc::new(lookup),
            config.geo_cache_ttl(),
            config.geo_cache_max_entries,
            config.geo_timeout(),
        ))
    }

    pub async fn resolve(&self, ip: &str) -> GeoLocation {
        let ip = ip.trim();
        if ip.is_empty() || ip.eq_ignore_ascii_case("localhost") {
            return GeoLocation::local();
        }

        let addr = match ip.parse::<IpAddr>() {
            Ok(addr) => addr,
            Err(_) => {
                debug!(ip = %ip, "Unparseable client address, skipping geolocation");
                return GeoLocation::unknown();
            }
        };

        if is_local_ip(addr) {
            return GeoLocation::local();
        }

        if let Some(cached) = self.cache.get(&addr).await {
            return cached;
        }

        match tokio::time::timeout(self.timeout, self.lookup.lookup(addr)).await {
            Ok(Ok(location)) => {
                self.cache.insert(addr, location.clone()).await;
                location
            }
            Ok(Err(e)) => {
                warn!(ip = %addr, error = %e, "Geolocation lookup failed");
                GeoLocation::unknown()
            }
            Err(_) => {
                warn!(ip = %addr, timeout_ms = self.timeout.as_millis() as u64, "Geolocation lookup timed out");
                GeoLocation::unknown()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers after an optional delay
    pub(crate) struct FakeLookup {
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub fail: bool,
    }

    impl FakeLookup {
        pub(crate) fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl GeoLookup for FakeLookup {
        async fn lookup(&self, _ip: IpAddr) -> Result<GeoLocation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                bail!("upstream unavailable");
            }
            Ok(GeoLocation {
                country: "Poland".to_string(),
                region: "Mazovia".to_string(),
                city: "Warsaw".to_string(),
            })
        }
    }

    fn resolver(lookup: Arc<FakeLookup>, timeout: Duration) -> GeoResolver {
        GeoResolver::new(lookup, Duration::from_secs(3600), 100, timeout)
    }

    #[test]
    fn classifies_local_addresses() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.0.1",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:192.168.0.1",
        ] {
            assert!(is_local_ip(ip.parse().unwrap()), "{ip} should be local");
        }
        for ip in ["8.8.8.8", "203.0.113.7", "2001:4860:4860::8888"] {
            assert!(!is_local_ip(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[tokio::test]
    async fn local_addresses_never_hit_the_network() {
        let lookup = Arc::new(FakeLookup::ok());
        let geo = resolver(lookup.clone(), Duration::from_secs(5));

        for ip in ["", "localhost", "127.0.0.1", "::1", "192.168.0.10"] {
            assert_eq!(geo.resolve(ip).await, GeoLocation::local());
        }
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_lookups_are_cached() {
        let lookup = Arc::new(FakeLookup::ok());
        let geo = resolver(lookup.clone(), Duration::from_secs(5));

        let first = geo.resolve("8.8.8.8").await;
        let second = geo.resolve("8.8.8.8").await;

        assert_eq!(first.city, "Warsaw");
        assert_eq!(first, second);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_fall_back_to_unknown_and_are_not_cached() {
        let lookup = Arc::new(FakeLookup {
            fail: true,
            ..FakeLookup::ok()
        });
        let geo = resolver(lookup.clone(), Duration::from_secs(5));

        assert_eq!(geo.resolve("8.8.8.8").await, GeoLocation::unknown());
        assert_eq!(geo.resolve("8.8.8.8").await, GeoLocation::unknown());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_upstream_times_out_to_unknown() {
        let lookup = Arc::new(FakeLookup {
            delay: Duration::from_secs(10),
            ..FakeLookup::ok()
        });
        let geo = resolver(lookup, Duration::from_millis(50));

        let started = std::time::Instant::now();
        assert_eq!(geo.resolve("1.1.1.1").await, GeoLocation::unknown());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn garbage_input_is_unknown_without_lookup() {
        let lookup = Arc::new(FakeLookup::ok());
        let geo = resolver(lookup.clone(), Duration::from_secs(5));

        assert_eq!(geo.resolve("not-an-ip").await, GeoLocation::unknown());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_unknown() {
        // Port 9 (discard) is closed on test machines, so the connect fails fast
        let lookup = IpApiLookup::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let geo = GeoResolver::new(
            Arc::new(lookup),
            Duration::from_secs(60),
            10,
            Duration::from_secs(3),
        );

        assert_eq!(geo.resolve("8.8.4.4").await, GeoLocation::unknown());
    }
}
