use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Link {
    pub id: i64,
    pub slug: String,
    pub original_url: String,
    pub created_by_admin: bool,
    pub created_at: i64,
    /// Unix seconds; only set for anonymous links
    pub expires_at: Option<i64>,
    /// Best-effort counter bumped by the click recorder
    pub clicks: i64,
}

impl Link {
    /// A link expires once `now` is strictly past its expiration timestamp.
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}

/// Insert payload; timestamps are computed by the caller so the store stays clock-free.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub slug: String,
    pub original_url: String,
    pub created_by_admin: bool,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// A link plus its click count aggregated from the click events table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkWithClicks {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub link: Link,
    pub click_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(expires_at: Option<i64>) -> Link {
        Link {
            id: 1,
            slug: "abc1234".to_string(),
            original_url: "https://example.com".to_string(),
            created_by_admin: expires_at.is_none(),
            created_at: 1_000,
            expires_at,
            clicks: 0,
        }
    }

    #[test]
    fn permanent_links_never_expire() {
        let l = link(None);
        assert!(!l.is_expired_at(i64::MAX));
        assert!(l.is_permanent());
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let l = link(Some(2_000));
        assert!(!l.is_expired_at(1_000));
        assert!(!l.is_expired_at(2_000));
        assert!(l.is_expired_at(2_001));
    }
}
