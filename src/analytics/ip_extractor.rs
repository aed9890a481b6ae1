//! Client IP extraction from HTTP headers with trust validation
//!
//! - `none`: the socket peer address is used as-is
//! - `cloudflare`: `CF-Connecting-IP`
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`
//!
//! In standard mode a non-empty `trusted_proxies` list also gates the headers:
//! they are only honoured when the socket peer is itself a trusted proxy.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address according to the trust configuration
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            if !config.trusted_proxies.is_empty() && !is_trusted(socket_addr, config) {
                return socket_addr;
            }
            extract_standard_ip(headers, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn is_trusted(ip: IpAddr, config: &AnalyticsConfig) -> bool {
    config.trusted_proxies.iter().any(|net| net.contains(&ip))
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    let forwarded = forwarded_chain(headers);
    if !forwarded.is_empty() {
        return select_from_chain(&forwarded, config);
    }

    let xff = x_forwarded_for_chain(headers);
    if !xff.is_empty() {
        return select_from_chain(&xff, config);
    }

    None
}

/// All `for=` addresses of the RFC 7239 Forwarded header, left to right
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    let Some(value) = headers.get("forwarded").and_then(|h| h.to_str().ok()) else {
        return vec![];
    };

    value
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|pair| {
                let (key, val) = pair.trim().split_once('=')?;
                if !key.trim().eq_ignore_ascii_case("for") {
                    return None;
                }
                parse_forwarded_node(val.trim())
            })
        })
        .collect()
}

/// Accepts `192.0.2.60`, `"192.0.2.60:4711"`, `"[2001:db8::1]"` and `"[2001:db8::1]:4711"`.
fn parse_forwarded_node(raw: &str) -> Option<IpAddr> {
    let node = raw.trim_matches('"');

    if let Some(rest) = node.strip_prefix('[') {
        let (addr, _) = rest.split_once(']')?;
        return addr.parse().ok();
    }

    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }

    // IPv4 with port
    let (addr, _) = node.rsplit_once(':')?;
    addr.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect()
}

/// Pick the client out of a proxy chain (leftmost = original client).
fn select_from_chain(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    // Fixed hop count: skip that many proxies from the right
    if let Some(hops) = config.num_trusted_proxies {
        return if chain.len() > hops {
            chain.get(chain.len() - hops - 1).copied()
        } else {
            chain.first().copied()
        };
    }

    // CIDR trust: first untrusted address walking right to left
    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(**ip, config))
            .or_else(|| chain.first())
            .copied();
    }

    chain.first().copied()
}
