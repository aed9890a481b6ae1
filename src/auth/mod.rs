//! Single-operator authentication
//!
//! Credentials are compared against the configured admin identity, every
//! login call is written to the audit table before the response goes out,
//! and successful logins receive an HS256 session token.

pub mod middleware;
pub mod rate_limit;

use axum::http::{header, HeaderMap};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use crate::analytics::models::{truncate_chars, MAX_IP_LEN, MAX_USER_AGENT_LEN};
use crate::config::AuthConfig;
use crate::models::NewLoginAttempt;
use crate::storage::Storage;

pub use middleware::{require_admin, throttle_login, LoginThrottle};
pub use rate_limit::LoginRateLimiter;

pub const TOKEN_ISSUER: &str = "kintercut";
const MAX_USERNAME_LEN: usize = 100;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("failed to record login attempt: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("failed to issue token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
    iss: String,
}

/// Verified admin identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub expires_at: i64,
}

/// Who is calling an endpoint where authentication is optional
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Admin(Identity),
    Anonymous,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: i64,
}

pub struct AuthService {
    config: AuthConfig,
    storage: Arc<dyn Storage>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthService {
    pub fn new(config: AuthConfig, storage: Arc<dyn Storage>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Self {
            config,
            storage,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Check credentials, audit the attempt, and issue a token on success.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<IssuedToken, AuthError> {
        let success = self.credentials_match(username, password);
        let now = chrono::Utc::now().timestamp();

        let mut attempt = NewLoginAttempt {
            username: username.to_string(),
            ip_address: ip.to_string(),
            user_agent: user_agent.to_string(),
            success,
            created_at: now,
        };
        truncate_chars(&mut attempt.username, MAX_USERNAME_LEN);
        truncate_chars(&mut attempt.ip_address, MAX_IP_LEN);
        truncate_chars(&mut attempt.user_agent, MAX_USER_AGENT_LEN);

        self.storage
            .record_login_attempt(&attempt)
            .await
            .map_err(AuthError::Storage)?;

        if !success {
            warn!(username = %attempt.username, ip = %ip, "Failed admin login");
            return Err(AuthError::InvalidCredentials);
        }

        info!(username = %attempt.username, ip = %ip, "Admin logged in");
        self.issue_token(&self.config.admin_username, now)
    }

    fn issue_token(&self, username: &str, now: i64) -> Result<IssuedToken, AuthError> {
        let expires_at = now + self.config.token_ttl_secs;
        let claims = Claims {
            sub: username.to_string(),
            iat: now,
            exp: expires_at,
            iss: TOKEN_ISSUER.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Validate signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(Identity {
            username: data.claims.sub,
            expires_at: data.claims.exp,
        })
    }

    /// Like `verify`, but a missing or bad token just means an anonymous caller.
    pub fn try_verify(&self, token: Option<&str>) -> Caller {
        match token.map(|t| self.verify(t)) {
            Some(Ok(identity)) => Caller::Admin(identity),
            _ => Caller::Anonymous,
        }
    }

    /// Compare keyed digests in constant time so neither field leaks through timing.
    fn credentials_match(&self, username: &str, password: &str) -> bool {
        let digests = (
            self.keyed_digest(username),
            self.keyed_digest(&self.config.admin_username),
            self.keyed_digest(password),
            self.keyed_digest(&self.config.admin_password),
        );

        match digests {
            (Some(user), Some(expected_user), Some(pass), Some(expected_pass)) => {
                let user_ok = user.ct_eq(&expected_user);
                let pass_ok = pass.ct_eq(&expected_pass);
                (user_ok & pass_ok).into()
            }
            _ => false,
        }
    }

    fn keyed_digest(&self, value: &str) -> Option<Vec<u8>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.jwt_secret.as_bytes()).ok()?;
        mac.update(value.as_bytes());
        Some(mac.finalize().into_bytes().to_vec())
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::storage::SqliteStorage;
    use axum::http::HeaderValue;

    async fn service() -> (AuthService, Arc<dyn Storage>) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        (
            AuthService::new(test_config().auth, Arc::clone(&storage)),
            storage,
        )
    }

    #[tokio::test]
    async fn login_issues_verifiable_token() {
        let (auth, _) = service().await;

        let issued = auth.login("admin", "s3cret", "203.0.113.1", "ua").await.unwrap();
        let identity = auth.verify(&issued.token).unwrap();

        assert_eq!(identity.username, "admin");
        assert_eq!(identity.expires_at, issued.expires_at);
        let ttl = issued.expires_at - chrono::Utc::now().timestamp();
        assert!((24 * 3600 - 5..=24 * 3600).contains(&ttl));
    }

    #[tokio::test]
    async fn wrong_username_and_wrong_password_look_the_same() {
        let (auth, _) = service().await;

        let bad_user = auth.login("root", "s3cret", "ip", "ua").await.unwrap_err();
        let bad_pass = auth.login("admin", "nope", "ip", "ua").await.unwrap_err();

        assert_eq!(bad_user.to_string(), bad_pass.to_string());
        assert!(matches!(bad_user, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn every_attempt_is_audited() {
        let (auth, storage) = service().await;

        let _ = auth.login("admin", "wrong", "10.0.0.1", "ua").await;
        let _ = auth.login("admin", "s3cret", "10.0.0.1", "ua").await;

        let attempts = storage.list_login_attempts(100).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts.iter().filter(|a| a.success).count(), 1);
        assert_eq!(storage.count_failed_logins_since(0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tampered_and_foreign_tokens_are_rejected() {
        let (auth, storage) = service().await;
        let issued = auth.login("admin", "s3cret", "ip", "ua").await.unwrap();

        let mut tampered = issued.token.clone();
        tampered.pop();
        assert!(matches!(auth.verify(&tampered), Err(AuthError::InvalidToken)));

        let mut other_config = test_config().auth;
        other_config.jwt_secret = "another-secret".to_string();
        let other = AuthService::new(other_config, storage);
        assert!(other.verify(&issued.token).is_err());
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let (auth, _) = service().await;
        // Well beyond the default validation leeway
        let past = chrono::Utc::now().timestamp() - 3 * 24 * 3600;
        let issued = auth.issue_token("admin", past).unwrap();

        assert!(matches!(auth.verify(&issued.token), Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn try_verify_falls_back_to_anonymous() {
        let (auth, _) = service().await;
        let issued = auth.login("admin", "s3cret", "ip", "ua").await.unwrap();

        assert!(auth.try_verify(Some(&issued.token)).is_admin());
        assert_eq!(auth.try_verify(Some("garbage")), Caller::Anonymous);
        assert_eq!(auth.try_verify(None), Caller::Anonymous);
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer   xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
