use anyhow::{bail, Context};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    /// Public prefix used to build short URLs
    pub base_url: String,
    /// Origin of the admin frontend, allowed by CORS
    pub frontend_url: String,
    pub links: LinkConfig,
    pub auth: AuthConfig,
    pub analytics: AnalyticsConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Lifetime of links created without an admin token
    pub public_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub admin_username: String,
    pub admin_password: String,
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
    pub login_max_attempts: usize,
    pub login_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub geo_api_url: String,
    pub geo_timeout_ms: u64,
    pub geo_cache_ttl_secs: u64,
    pub geo_cache_max_entries: u64,
    pub click_queue_capacity: usize,
    pub click_worker_concurrency: usize,
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxies whose forwarding headers are honoured (CIDR notation)
    pub trusted_proxies: Vec<IpNet>,
    /// Number of proxy hops to skip from the right of X-Forwarded-For
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket peer address only
    #[default]
    None,
    /// Honour RFC 7239 Forwarded and X-Forwarded-For
    Standard,
    /// Honour CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT`; unset means text.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var("LOG_FORMAT") {
            Ok(raw) => raw.parse(),
            Err(_) => Ok(LogFormat::Text),
        }
    }
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("LOG_FORMAT must be 'text' or 'json', got '{other}'"),
        }
    }
}

impl AuthConfig {
    pub fn login_window(&self) -> Duration {
        Duration::from_secs(self.login_window_secs)
    }
}

impl AnalyticsConfig {
    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms)
    }

    pub fn geo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.geo_cache_ttl_secs)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            geo_api_url: "http://ip-api.com".to_string(),
            geo_timeout_ms: 5_000,
            geo_cache_ttl_secs: 24 * 3600,
            geo_cache_max_entries: 10_000,
            click_queue_capacity: 10_000,
            click_worker_concurrency: 4,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./kintercut.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("API_PORT must be a valid port number")?;

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = std::env::var("REDIRECT_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("REDIRECT_PORT must be a valid port number")?;

        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let public_ttl_secs = env_duration_secs("PUBLIC_LINK_TTL", 48 * 3600)?;

        let auth = AuthConfig {
            admin_username: std::env::var("ADMIN_USERNAME")
                .unwrap_or_else(|_| "admin".to_string()),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_ADMIN_PASSWORD.to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string()),
            token_ttl_secs: env_duration_secs("TOKEN_TTL", 24 * 3600)?,
            login_max_attempts: std::env::var("LOGIN_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            login_window_secs: env_duration_secs("LOGIN_WINDOW", 24 * 3600)? as u64,
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(list) => parse_cidr_list(&list)?,
            Err(_) => vec![],
        };

        let defaults = AnalyticsConfig::default();
        let analytics = AnalyticsConfig {
            geo_api_url: std::env::var("GEO_API_URL").unwrap_or(defaults.geo_api_url),
            geo_timeout_ms: std::env::var("GEO_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.geo_timeout_ms),
            geo_cache_ttl_secs: env_duration_secs(
                "GEO_CACHE_TTL",
                defaults.geo_cache_ttl_secs as i64,
            )? as u64,
            geo_cache_max_entries: std::env::var("GEO_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.geo_cache_max_entries),
            click_queue_capacity: std::env::var("CLICK_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.click_queue_capacity),
            click_worker_concurrency: std::env::var("CLICK_WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.click_worker_concurrency),
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies: std::env::var("NUM_TRUSTED_PROXIES")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        let log_format = LogFormat::from_env()?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            base_url,
            frontend_url,
            links: LinkConfig { public_ttl_secs },
            auth,
            analytics,
            log_format,
        })
    }

    /// Reject settings the service cannot run with.
    ///
    /// Insecure defaults only produce a warning so local development keeps working.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            bail!("BASE_URL must start with http:// or https://, got '{}'", self.base_url);
        }
        if self.database.max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        if self.links.public_ttl_secs <= 0 {
            bail!("PUBLIC_LINK_TTL must be greater than zero");
        }
        if self.auth.jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        if self.auth.admin_username.is_empty() || self.auth.admin_password.is_empty() {
            bail!("ADMIN_USERNAME and ADMIN_PASSWORD must not be empty");
        }
        if self.auth.token_ttl_secs <= 0 {
            bail!("TOKEN_TTL must be greater than zero");
        }
        if self.auth.login_max_attempts == 0 {
            bail!("LOGIN_MAX_ATTEMPTS must be at least 1");
        }
        if self.analytics.click_queue_capacity == 0 {
            bail!("CLICK_QUEUE_CAPACITY must be at least 1");
        }
        if self.analytics.click_worker_concurrency == 0
            || self.analytics.click_worker_concurrency > 256
        {
            bail!(
                "CLICK_WORKER_CONCURRENCY must be between 1 and 256, got {}",
                self.analytics.click_worker_concurrency
            );
        }
        if self.analytics.geo_timeout_ms == 0 {
            bail!("GEO_TIMEOUT_MS must be greater than zero");
        }

        for warning in self.warnings() {
            tracing::warn!("{warning}");
        }

        Ok(())
    }

    /// Settings that work but are unsafe to expose
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();

        if self.auth.admin_password == DEFAULT_ADMIN_PASSWORD {
            warnings.push("ADMIN_PASSWORD is the built-in default; set it before exposing the service");
        }
        if self.auth.jwt_secret == DEFAULT_JWT_SECRET {
            warnings.push("JWT_SECRET is the built-in default; tokens can be forged by anyone who knows it");
        }
        if self.analytics.trusted_proxy_mode == TrustedProxyMode::Standard
            && self.analytics.trusted_proxies.is_empty()
            && self.analytics.num_trusted_proxies.is_none()
        {
            warnings.push(
                "TRUSTED_PROXY_MODE=standard without TRUSTED_PROXIES or NUM_TRUSTED_PROXIES trusts the leftmost X-Forwarded-For entry; clients can spoof their address and dodge the login throttle",
            );
        }

        warnings
    }

    /// Origins allowed to call the API from a browser
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins = vec![self.frontend_url.clone()];
        if self.base_url != self.frontend_url {
            origins.push(self.base_url.clone());
        }
        origins
    }
}

fn env_duration_secs(key: &str, default_secs: i64) -> anyhow::Result<i64> {
    match std::env::var(key) {
        Ok(raw) => parse_duration_secs(&raw).with_context(|| format!("{key} is not a valid duration")),
        Err(_) => Ok(default_secs),
    }
}

/// Parse durations such as `90`, `90s`, `30m`, `48h` or `2d` into seconds.
pub fn parse_duration_secs(raw: &str) -> anyhow::Result<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration");
    }

    let (digits, multiplier) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1),
        Some('m') => (&raw[..raw.len() - 1], 60),
        Some('h') => (&raw[..raw.len() - 1], 3600),
        Some('d') => (&raw[..raw.len() - 1], 86_400),
        _ => (raw, 1),
    };

    let value = digits
        .trim()
        .parse::<i64>()
        .with_context(|| format!("invalid duration '{raw}'"))?;
    if value < 0 {
        bail!("duration must not be negative: '{raw}'");
    }

    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("duration '{raw}' is too large"))
}

/// Human form of a duration for user-facing messages, e.g. "24 hours".
pub fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        s if s >= 86_400 && s % 86_400 == 0 && s / 86_400 > 2 => plural(s / 86_400, "day"),
        s if s >= 3600 && s % 3600 == 0 => plural(s / 3600, "hour"),
        s if s >= 60 && s % 60 == 0 => plural(s / 60, "minute"),
        s => plural(s, "second"),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn parse_cidr_list(list: &str) -> anyhow::Result<Vec<IpNet>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // Bare addresses are accepted as single-host networks
            s.parse::<IpNet>()
                .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
                .with_context(|| format!("invalid entry in TRUSTED_PROXIES: '{s}'"))
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database: DatabaseConfig {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        api_server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        redirect_server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        },
        base_url: "http://localhost:3000".to_string(),
        frontend_url: "http://localhost:5173".to_string(),
        links: LinkConfig {
            public_ttl_secs: 48 * 3600,
        },
        auth: AuthConfig {
            admin_username: "admin".to_string(),
            admin_password: "s3cret".to_string(),
            jwt_secret: "test-jwt-secret".to_string(),
            token_ttl_secs: 24 * 3600,
            login_max_attempts: 3,
            login_window_secs: 24 * 3600,
        },
        analytics: AnalyticsConfig::default(),
        log_format: LogFormat::Text,
    }
}
