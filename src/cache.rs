//! Session cache: a key-value store with per-key expiry.
//!
//! Backs two different concerns with very different failure semantics:
//!
//! - User projections (`user:<sub>`): a read-through cache in front of the
//!   user directory. Store errors are swallowed - a miss is always safe, the
//!   directory remains the source of truth.
//! - Refresh-token validity records (`refresh:<jti>`, `used:<jti>`): the
//!   cache IS the source of truth here. These operations propagate errors so
//!   callers fail closed instead of silently skipping the revocation check.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::db::UserProjection;

/// TTL for the `used:<jti>` replay marker. Long enough to catch
/// near-simultaneous replays of a rotated token, short enough not to
/// accumulate unboundedly.
pub const USED_MARKER_TTL_SECS: u64 = 60;

#[derive(Clone)]
pub struct SessionCache {
    pool: SqlitePool,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn user_key(sub: &str) -> String {
    format!("user:{}", sub)
}

fn refresh_key(jti: &str) -> String {
    format!("refresh:{}", jti)
}

fn used_key(jti: &str) -> String {
    format!("used:{}", jti)
}

impl SessionCache {
    /// Open or create a cache database at the given path.
    /// Use ":memory:" for an in-memory cache.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Get a live value by key. Expired entries are treated as absent.
    pub async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM cache_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(unix_now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Set a value with an optional time-to-live in seconds.
    pub async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), sqlx::Error> {
        let expires_at = ttl_secs.map(|ttl| unix_now() + ttl as i64);
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a key. Returns true if a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically fetch and delete a live value in a single statement.
    ///
    /// Under concurrent calls for the same key, at most one caller observes
    /// the value; the rest see None. This is the check-and-delete primitive
    /// the refresh rotation protocol relies on - a separate get-then-delete
    /// would be a race.
    pub async fn take(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "DELETE FROM cache_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?) RETURNING value",
        )
        .bind(key)
        .bind(unix_now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Delete all expired entries. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(unix_now())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // User projections (cache-optional: errors degrade to a miss)
    // ------------------------------------------------------------------

    /// Get a cached user projection. Any store or decode error is a miss.
    pub async fn get_user(&self, sub: &str) -> Option<UserProjection> {
        match self.get(&user_key(sub)).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(user) => Some(user),
                Err(e) => {
                    debug!(sub = %sub, error = %e, "Discarding undecodable cached projection");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(sub = %sub, error = %e, "Cache unavailable for projection read");
                None
            }
        }
    }

    /// Store a user projection with the given TTL. Errors are swallowed -
    /// the directory remains authoritative.
    pub async fn store_user(&self, user: &UserProjection, ttl_secs: u64) {
        let json = match serde_json::to_string(user) {
            Ok(json) => json,
            Err(e) => {
                debug!(sub = %user.uuid, error = %e, "Failed to encode projection");
                return;
            }
        };
        if let Err(e) = self.set(&user_key(&user.uuid), &json, Some(ttl_secs)).await {
            debug!(sub = %user.uuid, error = %e, "Cache unavailable for projection write");
        }
    }

    /// Drop the cached projection for a subject. Errors are swallowed.
    pub async fn invalidate_user(&self, sub: &str) {
        if let Err(e) = self.delete(&user_key(sub)).await {
            debug!(sub = %sub, error = %e, "Cache unavailable for projection invalidation");
        }
    }

    // ------------------------------------------------------------------
    // Refresh-token validity records (authoritative: errors propagate)
    // ------------------------------------------------------------------

    /// Register a freshly issued refresh token's JTI, mapping it to the
    /// subject id for the token's full lifetime.
    pub async fn register_refresh(
        &self,
        jti: &str,
        sub: &str,
        ttl_secs: u64,
    ) -> Result<(), sqlx::Error> {
        self.set(&refresh_key(jti), sub, Some(ttl_secs)).await
    }

    /// Look up the subject for a live refresh JTI without consuming it.
    pub async fn refresh_subject(&self, jti: &str) -> Result<Option<String>, sqlx::Error> {
        self.get(&refresh_key(jti)).await
    }

    /// Atomically consume a live refresh JTI, returning its subject.
    /// At most one concurrent caller gets Some for a given JTI.
    pub async fn consume_refresh(&self, jti: &str) -> Result<Option<String>, sqlx::Error> {
        self.take(&refresh_key(jti)).await
    }

    /// Delete a refresh JTI record (sign-out, defense in depth on replay).
    pub async fn revoke_refresh(&self, jti: &str) -> Result<bool, sqlx::Error> {
        self.delete(&refresh_key(jti)).await
    }

    /// Write the short-lived "already rotated" marker for a JTI.
    pub async fn mark_used(&self, jti: &str) -> Result<(), sqlx::Error> {
        self.set(&used_key(jti), "1", Some(USED_MARKER_TTL_SECS)).await
    }

    /// Check whether a JTI has already been consumed by a rotation.
    pub async fn is_used(&self, jti: &str) -> Result<bool, sqlx::Error> {
        Ok(self.get(&used_key(jti)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserRole;

    async fn cache() -> SessionCache {
        SessionCache::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = cache().await;

        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        // Overwrite
        cache.set("k", "v2", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v2".to_string()));

        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = cache().await;

        // TTL of zero expires at insertion time
        cache.set("gone", "v", Some(0)).await.unwrap();
        assert_eq!(cache.get("gone").await.unwrap(), None);
        assert_eq!(cache.take("gone").await.unwrap(), None);

        cache.set("kept", "v", Some(3600)).await.unwrap();
        assert_eq!(cache.get("kept").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_take_returns_value_once() {
        let cache = cache().await;

        cache.set("k", "v", Some(3600)).await.unwrap();
        assert_eq!(cache.take("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(cache.take("k").await.unwrap(), None);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = cache().await;

        cache.set("old", "v", Some(0)).await.unwrap();
        cache.set("new", "v", Some(3600)).await.unwrap();
        cache.set("forever", "v", None).await.unwrap();

        let purged = cache.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(cache.get("new").await.unwrap(), Some("v".to_string()));
        assert_eq!(cache.get("forever").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_record_lifecycle() {
        let cache = cache().await;

        cache.register_refresh("jti-1", "uuid-1", 3600).await.unwrap();
        assert_eq!(
            cache.refresh_subject("jti-1").await.unwrap(),
            Some("uuid-1".to_string())
        );

        // Consuming removes the record; a second consume sees nothing.
        assert_eq!(
            cache.consume_refresh("jti-1").await.unwrap(),
            Some("uuid-1".to_string())
        );
        assert_eq!(cache.consume_refresh("jti-1").await.unwrap(), None);
        assert_eq!(cache.refresh_subject("jti-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_used_marker() {
        let cache = cache().await;

        assert!(!cache.is_used("jti-1").await.unwrap());
        cache.mark_used("jti-1").await.unwrap();
        assert!(cache.is_used("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_user_projection_roundtrip() {
        let cache = cache().await;

        let user = UserProjection {
            uuid: "uuid-1".to_string(),
            username: "alice".to_string(),
            email: "alice@x.com".to_string(),
            role: UserRole::User,
            is_email_verified: true,
            is_suspended: false,
            last_login: Some(1_700_000_000),
            created_at: "2025-01-01 00:00:00".to_string(),
        };

        assert!(cache.get_user("uuid-1").await.is_none());
        cache.store_user(&user, 3600).await;

        let cached = cache.get_user("uuid-1").await.unwrap();
        assert_eq!(cached.uuid, user.uuid);
        assert_eq!(cached.email, user.email);
        assert!(cached.is_email_verified);

        cache.invalidate_user("uuid-1").await;
        assert!(cache.get_user("uuid-1").await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_projection_is_a_miss() {
        let cache = cache().await;

        cache.set("user:uuid-1", "not json", Some(3600)).await.unwrap();
        assert!(cache.get_user("uuid-1").await.is_none());
    }
}
