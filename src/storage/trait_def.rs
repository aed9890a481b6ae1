use crate::models::{
    Click, ClickStats, Link, LinkWithClicks, LoginAttempt, NewClick, NewLink, NewLoginAttempt,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("slug already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert a link. A duplicate slug yields `StorageError::Conflict`.
    async fn create_link(&self, link: &NewLink) -> StorageResult<Link>;

    async fn get_link(&self, id: i64) -> Result<Option<Link>>;

    async fn get_link_by_slug(&self, slug: &str) -> Result<Option<Link>>;

    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    /// Hard delete a link and its click events. Returns false if the link did not exist.
    async fn delete_link(&self, id: i64) -> Result<bool>;

    /// Links of one creator class, newest first, with aggregated click counts
    async fn list_links(&self, created_by_admin: bool) -> Result<Vec<LinkWithClicks>>;

    async fn record_click(&self, click: &NewClick) -> Result<Click>;

    /// Atomic `clicks = clicks + 1`
    async fn increment_clicks(&self, link_id: i64) -> Result<()>;

    async fn click_stats(
        &self,
        link_id: i64,
        recent_limit: i64,
        top_countries: i64,
    ) -> Result<ClickStats>;

    async fn record_login_attempt(&self, attempt: &NewLoginAttempt) -> Result<LoginAttempt>;

    /// Most recent attempts first
    async fn list_login_attempts(&self, limit: i64) -> Result<Vec<LoginAttempt>>;

    async fn count_failed_logins_since(&self, since: i64) -> Result<i64>;
}
