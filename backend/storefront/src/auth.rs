//! Admin access gate: credential check and opaque bearer sessions.
//!
//! Admin handlers receive the capability as an explicit `Authorization:
//! Bearer` header and pass it to [`authorize`]; there is no ambient auth
//! state. Tokens are random, stored server-side, and expire after 24 hours.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{Result, StoreError};

const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AdminSession {
    pub token: String,
    pub admin_id: String,
    pub username: String,
    pub expires_at: String,
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create the configured admin account when none exists yet.
pub async fn bootstrap_admin(pool: &SqlitePool, config: &Config) -> Result<()> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let salt = Uuid::new_v4().simple().to_string();
    sqlx::query(
        r#"
        INSERT INTO admins (id, username, password_salt, password_digest, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&config.admin_username)
    .bind(&salt)
    .bind(digest_password(&salt, &config.admin_password))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    info!("Bootstrapped admin account '{}'", config.admin_username);
    if config.admin_password == "admin123" {
        warn!("Admin account uses the default password; set ADMIN_PASSWORD");
    }
    Ok(())
}

/// Check the credential pair and issue a fresh session token.
///
/// Unknown usernames and wrong passwords are indistinguishable to the
/// caller.
pub async fn login(pool: &SqlitePool, username: &str, password: &str) -> Result<AdminSession> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        "SELECT id, password_salt, password_digest FROM admins WHERE username = ?1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some((admin_id, salt, stored_digest)) = row else {
        return Err(StoreError::Unauthorized);
    };
    if digest_password(&salt, password) != stored_digest {
        return Err(StoreError::Unauthorized);
    }

    let session = AdminSession {
        token: Uuid::new_v4().to_string(),
        admin_id,
        username: username.to_string(),
        expires_at: (Utc::now() + Duration::hours(SESSION_TTL_HOURS)).to_rfc3339(),
    };
    sqlx::query(
        "INSERT INTO admin_sessions (token, admin_id, username, expires_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&session.token)
    .bind(&session.admin_id)
    .bind(&session.username)
    .bind(&session.expires_at)
    .execute(pool)
    .await?;

    info!("Admin '{username}' logged in");
    Ok(session)
}

/// Validate a bearer token. Expired sessions are removed on sight.
pub async fn authorize(pool: &SqlitePool, token: &str) -> Result<AdminSession> {
    let session: Option<AdminSession> = sqlx::query_as(
        "SELECT token, admin_id, username, expires_at FROM admin_sessions WHERE token = ?1",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    let Some(session) = session else {
        return Err(StoreError::Unauthorized);
    };

    let expires = DateTime::parse_from_rfc3339(&session.expires_at)
        .map_err(|_| StoreError::Unauthorized)?;
    if expires < Utc::now() {
        sqlx::query("DELETE FROM admin_sessions WHERE token = ?1")
            .bind(token)
            .execute(pool)
            .await?;
        return Err(StoreError::Unauthorized);
    }

    Ok(session)
}

/// Pull the bearer token out of the request headers.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StoreError::Unauthorized)
}

/// Convenience wrapper used by every admin handler.
pub async fn require_admin(pool: &SqlitePool, headers: &HeaderMap) -> Result<AdminSession> {
    authorize(pool, bearer_token(headers)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::test_pool;

    async fn bootstrapped_pool() -> SqlitePool {
        let pool = test_pool().await;
        bootstrap_admin(&pool, &Config::test()).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn bootstrap_runs_once() {
        let pool = bootstrapped_pool().await;
        bootstrap_admin(&pool, &Config::test()).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn login_then_authorize() {
        let pool = bootstrapped_pool().await;
        let session = login(&pool, "admin", "admin123").await.unwrap();

        let authorized = authorize(&pool, &session.token).await.unwrap();
        assert_eq!(authorized.username, "admin");
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let pool = bootstrapped_pool().await;
        assert!(matches!(
            login(&pool, "admin", "nope").await,
            Err(StoreError::Unauthorized)
        ));
        assert!(matches!(
            login(&pool, "ghost", "admin123").await,
            Err(StoreError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let pool = bootstrapped_pool().await;
        assert!(matches!(
            authorize(&pool, "not-a-token").await,
            Err(StoreError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn expired_session_is_rejected_and_removed() {
        let pool = bootstrapped_pool().await;
        let expired = (Utc::now() - Duration::hours(1)).to_rfc3339();
        sqlx::query(
            "INSERT INTO admin_sessions (token, admin_id, username, expires_at) VALUES ('t1', 'a1', 'admin', ?1)",
        )
        .bind(&expired)
        .execute(&pool)
        .await
        .unwrap();

        assert!(matches!(
            authorize(&pool, "t1").await,
            Err(StoreError::Unauthorized)
        ));

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM admin_sessions WHERE token = 't1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }
}
