use crate::models::{
    Click, ClickStats, CountryStat, Link, LinkWithClicks, LoginAttempt, NewClick, NewLink,
    NewLoginAttempt,
};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid SQLite URL: {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(30) NOT NULL UNIQUE,
                original_url VARCHAR(2048) NOT NULL,
                created_by_admin BOOLEAN NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                clicks INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_links_admin_created ON links(created_by_admin, created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                clicked_at INTEGER NOT NULL,
                ip_address VARCHAR(45) NOT NULL,
                user_agent VARCHAR(512) NOT NULL DEFAULT '',
                country VARCHAR(100) NOT NULL DEFAULT '',
                region VARCHAR(100) NOT NULL DEFAULT '',
                city VARCHAR(100) NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_click_events_link ON click_events(link_id, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(100) NOT NULL,
                ip_address VARCHAR(45) NOT NULL,
                user_agent VARCHAR(512) NOT NULL DEFAULT '',
                success BOOLEAN NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_created ON login_attempts(created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_link(&self, link: &NewLink) -> StorageResult<Link> {
        let result = sqlx::query(
            r#"
            INSERT INTO links (slug, original_url, created_by_admin, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(&link.slug)
        .bind(&link.original_url)
        .bind(link.created_by_admin)
        .bind(link.created_at)
        .bind(link.expires_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let created = sqlx::query_as::<_, Link>(
            r#"
            SELECT id, slug, original_url, created_by_admin, created_at, expires_at, clicks
            FROM links
            WHERE id = ?
            "#,
        )
        .bind(result.last_insert_rowid())
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(created)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(
            r#"
            SELECT id, slug, original_url, created_by_admin, created_at, expires_at, clicks
            FROM links
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn get_link_by_slug(&self, slug: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(
            r#"
            SELECT id, slug, original_url, created_by_admin, created_at, expires_at, clicks
            FROM links
            WHERE slug = ?
            "#,
        )
        .bind(slug)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links WHERE slug = ?")
            .bind(slug)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(exists > 0)
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Clicks first so no event ever points at a missing link
        sqlx::query("DELETE FROM click_events WHERE link_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_links(&self, created_by_admin: bool) -> Result<Vec<LinkWithClicks>> {
        let links = sqlx::query_as::<_, LinkWithClicks>(
            r#"
            SELECT l.id, l.slug, l.original_url, l.created_by_admin, l.created_at,
                   l.expires_at, l.clicks,
                   (SELECT COUNT(*) FROM click_events c WHERE c.link_id = l.id) AS click_count
            FROM links l
            WHERE l.created_by_admin = ?
            ORDER BY l.created_at DESC, l.id DESC
            "#,
        )
        .bind(created_by_admin)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(links)
    }

    async fn record_click(&self, click: &NewClick) -> Result<Click> {
        let result = sqlx::query(
            r#"
            INSERT INTO click_events (link_id, clicked_at, ip_address, user_agent, country, region, city)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(click.link_id)
        .bind(click.clicked_at)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.country)
        .bind(&click.region)
        .bind(&click.city)
        .execute(self.pool.as_ref())
        .await?;

        Ok(Click {
            id: result.last_insert_rowid(),
            link_id: click.link_id,
            clicked_at: click.clicked_at,
            ip_address: click.ip_address.clone(),
            user_agent: click.user_agent.clone(),
            country: click.country.clone(),
            region: click.region.clone(),
            city: click.city.clone(),
        })
    }

    async fn increment_clicks(&self, link_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE links
            SET clicks = clicks + 1
            WHERE id = ?
            "#,
        )
        .bind(link_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn click_stats(
        &self,
        link_id: i64,
        recent_limit: i64,
        top_countries: i64,
    ) -> Result<ClickStats> {
        let (total_clicks, unique_ips) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(DISTINCT ip_address) FROM click_events WHERE link_id = ?",
        )
        .bind(link_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        let top_countries = sqlx::query_as::<_, CountryStat>(
            r#"
            SELECT country, COUNT(*) AS count
            FROM click_events
            WHERE link_id = ?
            GROUP BY country
            ORDER BY count DESC, country ASC
            LIMIT ?
            "#,
        )
        .bind(link_id)
        .bind(top_countries)
        .fetch_all(self.pool.as_ref())
        .await?;

        let recent_clicks = sqlx::query_as::<_, Click>(
            r#"
            SELECT id, link_id, clicked_at, ip_address, user_agent, country, region, city
            FROM click_events
            WHERE link_id = ?
            ORDER BY clicked_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(link_id)
        .bind(recent_limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(ClickStats {
            total_clicks,
            unique_ips,
            top_countries,
            recent_clicks,
        })
    }

    async fn record_login_attempt(&self, attempt: &NewLoginAttempt) -> Result<LoginAttempt> {
        let result = sqlx::query(
            r#"
            INSERT INTO login_attempts (username, ip_address, user_agent, success, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.username)
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.success)
        .bind(attempt.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(LoginAttempt {
            id: result.last_insert_rowid(),
            username: attempt.username.clone(),
            ip_address: attempt.ip_address.clone(),
            user_agent: attempt.user_agent.clone(),
            success: attempt.success,
            created_at: attempt.created_at,
        })
    }

    async fn list_login_attempts(&self, limit: i64) -> Result<Vec<LoginAttempt>> {
        let attempts = sqlx::query_as::<_, LoginAttempt>(
            r#"
            SELECT id, username, ip_address, user_agent, success, created_at
            FROM login_attempts
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(attempts)
    }

    async fn count_failed_logins_since(&self, since: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM login_attempts WHERE success = 0 AND created_at >= ?",
        )
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }
}
