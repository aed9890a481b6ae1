//! Data models for click analytics

use serde::{Deserialize, Serialize};

pub const LOCAL: &str = "Local";
pub const UNKNOWN: &str = "Unknown";

/// Coarse location of a visitor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub region: String,
    pub city: String,
}

impl GeoLocation {
    /// Sentinel for loopback, private and empty addresses
    pub fn local() -> Self {
        Self::sentinel(LOCAL)
    }

    /// Sentinel for any failed or unusable lookup
    pub fn unknown() -> Self {
        Self::sentinel(UNKNOWN)
    }

    fn sentinel(value: &str) -> Self {
        Self {
            country: value.to_string(),
            region: value.to_string(),
            city: value.to_string(),
        }
    }
}

pub const MAX_USER_AGENT_LEN: usize = 512;
pub const MAX_IP_LEN: usize = 45;

/// One visit queued for recording, captured at redirect time
#[derive(Debug, Clone)]
pub struct ClickJob {
    pub link_id: i64,
    pub ip: String,
    pub user_agent: String,
    pub occurred_at: i64,
}

impl ClickJob {
    pub fn new(link_id: i64, ip: impl Into<String>, user_agent: &str) -> Self {
        let mut ip = ip.into();
        truncate_chars(&mut ip, MAX_IP_LEN);
        let mut user_agent = user_agent.to_string();
        truncate_chars(&mut user_agent, MAX_USER_AGENT_LEN);

        Self {
            link_id,
            ip,
            user_agent,
            occurred_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &mut String, max: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_is_capped_at_512_chars() {
        let job = ClickJob::new(1, "203.0.113.9", &"é".repeat(600));
        assert_eq!(job.user_agent.chars().count(), MAX_USER_AGENT_LEN);
        assert_eq!(job.ip, "203.0.113.9");
    }

    #[test]
    fn short_strings_are_left_alone() {
        let mut s = "Mozilla/5.0".to_string();
        truncate_chars(&mut s, 512);
        assert_eq!(s, "Mozilla/5.0");
    }
}
