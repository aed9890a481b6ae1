//! Link lifecycle: create, resolve, list, inspect and delete short links.
//!
//! Anonymous links expire `public_ttl` after creation; admin links never do.
//! The store's unique constraint on `slug` is the final word on collisions:
//! the custom-slug existence check only short-circuits the common case.

use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::Caller;
use crate::models::{ClickStats, Link, LinkWithClicks, NewLink};
use crate::slug::{self, SlugError};
use crate::storage::{Storage, StorageError};

pub const MAX_URL_LEN: usize = 2048;
/// Attempts at a fresh random slug before giving up
const GENERATE_ATTEMPTS: usize = 5;
pub const RECENT_CLICKS_LIMIT: i64 = 100;
pub const TOP_COUNTRIES_LIMIT: i64 = 10;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("{0}")]
    InvalidSlug(SlugError),
    #[error("This slug is reserved")]
    ReservedSlug,
    #[error("This slug is already taken")]
    SlugTaken,
    #[error("Link not found")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<SlugError> for LinkError {
    fn from(err: SlugError) -> Self {
        match err {
            SlugError::Reserved => LinkError::ReservedSlug,
            other => LinkError::InvalidSlug(other),
        }
    }
}

/// Outcome of looking up a slug on the redirect path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Redirect(Link),
    Expired(Link),
    NotFound,
}

/// What a shorten call hands back to the client
#[derive(Debug, Clone, Serialize)]
pub struct CreatedLink {
    pub id: i64,
    pub short_url: String,
    pub slug: String,
    pub original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub permanent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkDetails {
    pub link: Link,
    pub short_url: String,
    pub stats: ClickStats,
}

pub struct LinkService {
    storage: Arc<dyn Storage>,
    public_ttl_secs: i64,
    base_url: String,
    generate: fn() -> String,
}

impl LinkService {
    pub fn new(storage: Arc<dyn Storage>, public_ttl_secs: i64, base_url: &str) -> Self {
        Self {
            storage,
            public_ttl_secs,
            base_url: base_url.trim_end_matches('/').to_string(),
            generate: slug::generate_slug,
        }
    }

    /// Swap the random slug source, e.g. for a deterministic one in tests.
    pub fn with_generator(mut self, generate: fn() -> String) -> Self {
        self.generate = generate;
        self
    }

    pub fn short_url(&self, slug: &str) -> String {
        format!("{}/{}", self.base_url, slug)
    }

    pub async fn create(
        &self,
        original_url: &str,
        custom_slug: Option<&str>,
        caller: &Caller,
    ) -> Result<CreatedLink, LinkError> {
        let original_url = validate_url(original_url)?;
        let is_admin = caller.is_admin();

        let created_at = chrono::Utc::now().timestamp();
        let expires_at = (!is_admin).then_some(created_at + self.public_ttl_secs);

        let custom_slug = custom_slug.map(str::trim).filter(|s| !s.is_empty());
        let link = match custom_slug {
            Some(raw) => {
                let slug = slug::normalize_custom_slug(raw, is_admin)?;
                if self.storage.slug_exists(&slug).await? {
                    return Err(LinkError::SlugTaken);
                }
                self.insert(&slug, &original_url, is_admin, created_at, expires_at)
                    .await?
            }
            None => {
                self.insert_generated(&original_url, is_admin, created_at, expires_at)
                    .await?
            }
        };

        info!(
            slug = %link.slug,
            link_id = link.id,
            permanent = link.is_permanent(),
            "Created short link"
        );

        Ok(CreatedLink {
            id: link.id,
            short_url: self.short_url(&link.slug),
            permanent: link.is_permanent(),
            slug: link.slug,
            original_url: link.original_url,
            expires_at: link.expires_at,
        })
    }

    async fn insert(
        &self,
        slug: &str,
        original_url: &str,
        is_admin: bool,
        created_at: i64,
        expires_at: Option<i64>,
    ) -> Result<Link, LinkError> {
        let new_link = NewLink {
            slug: slug.to_string(),
            original_url: original_url.to_string(),
            created_by_admin: is_admin,
            created_at,
            expires_at,
        };

        match self.storage.create_link(&new_link).await {
            Ok(link) => Ok(link),
            Err(StorageError::Conflict) => Err(LinkError::SlugTaken),
            Err(StorageError::Other(e)) => Err(LinkError::Storage(e)),
        }
    }

    async fn insert_generated(
        &self,
        original_url: &str,
        is_admin: bool,
        created_at: i64,
        expires_at: Option<i64>,
    ) -> Result<Link, LinkError> {
        for attempt in 1..=GENERATE_ATTEMPTS {
            let slug = (self.generate)();
            match self
                .insert(&slug, original_url, is_admin, created_at, expires_at)
                .await
            {
                Err(LinkError::SlugTaken) => {
                    warn!(slug = %slug, attempt, "Generated slug collided, retrying");
                }
                other => return other,
            }
        }

        Err(LinkError::SlugTaken)
    }

    /// Look up a slug for redirecting.
    pub async fn resolve(&self, slug: &str) -> Result<Resolution, LinkError> {
        self.resolve_at(slug, chrono::Utc::now().timestamp()).await
    }

    pub async fn resolve_at(&self, slug: &str, now: i64) -> Result<Resolution, LinkError> {
        let resolution = match self.storage.get_link_by_slug(slug).await? {
            Some(link) if link.is_expired_at(now) => Resolution::Expired(link),
            Some(link) => Resolution::Redirect(link),
            None => Resolution::NotFound,
        };
        Ok(resolution)
    }

    /// Hard delete; the slug becomes available again immediately.
    pub async fn delete(&self, id: i64) -> Result<(), LinkError> {
        if self.storage.delete_link(id).await? {
            info!(link_id = id, "Deleted link and its clicks");
            Ok(())
        } else {
            Err(LinkError::NotFound)
        }
    }

    pub async fn list(&self, created_by_admin: bool) -> Result<Vec<LinkWithClicks>, LinkError> {
        Ok(self.storage.list_links(created_by_admin).await?)
    }

    pub async fn details(&self, id: i64) -> Result<LinkDetails, LinkError> {
        let link = self.storage.get_link(id).await?.ok_or(LinkError::NotFound)?;
        let stats = self
            .storage
            .click_stats(id, RECENT_CLICKS_LIMIT, TOP_COUNTRIES_LIMIT)
            .await?;

        Ok(LinkDetails {
            short_url: self.short_url(&link.slug),
            link,
            stats,
        })
    }
}

/// Accept only absolute http(s) URLs with a host, at most `MAX_URL_LEN` long.
pub fn validate_url(raw: &str) -> Result<String, LinkError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(LinkError::InvalidUrl("URL is required".to_string()));
    }
    if raw.len() > MAX_URL_LEN {
        return Err(LinkError::InvalidUrl(format!(
            "URL must be at most {MAX_URL_LEN} characters"
        )));
    }

    let parsed = Url::parse(raw).map_err(|_| LinkError::InvalidUrl("Invalid URL format".into()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LinkError::InvalidUrl(
            "URL must start with http:// or https://".into(),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(LinkError::InvalidUrl("URL must include a host".into()));
    }

    Ok(raw.to_string())
}
