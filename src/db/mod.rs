mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use user::{NewUser, User, UserProjection, UserRole, UserStore};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Whether an error is a unique-constraint violation (duplicate email or
/// username at signup).
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
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

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Users table. Email and username are unique among non-deleted
                // accounts only, so soft-deletion frees them for reuse.
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    username TEXT NOT NULL COLLATE NOCASE,
                    email TEXT NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'user',
                    is_email_verified INTEGER NOT NULL DEFAULT 0,
                    is_suspended INTEGER NOT NULL DEFAULT 0,
                    is_deleted INTEGER NOT NULL DEFAULT 0,
                    terms_accepted INTEGER NOT NULL DEFAULT 0,
                    last_login INTEGER,
                    login_retries INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE UNIQUE INDEX idx_users_email_live ON users(email) WHERE is_deleted = 0",
                "CREATE UNIQUE INDEX idx_users_username_live ON users(username) WHERE is_deleted = 0",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NewUser<'static> {
        NewUser {
            uuid: "uuid-123",
            username: "alice",
            email: "Alice@X.com",
            password_hash: "$2b$12$fakehash",
            terms_accepted: true,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db.users().create(&alice()).await.unwrap();

        let user = db.users().get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.uuid, "uuid-123");
        assert_eq!(user.email, "alice@x.com", "email is stored case-folded");
        assert!(!user.is_email_verified);
        assert!(!user.is_suspended);
        assert_eq!(user.login_retries, 0);
        assert_eq!(user.role, UserRole::User);

        // Email lookup is case-insensitive
        let user = db.users().get_by_email("ALICE@x.com").await.unwrap().unwrap();
        assert_eq!(user.id, id);

        let user = db.users().get_by_uuid("uuid-123").await.unwrap().unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn test_duplicate_email_fails() {
        let db = Database::open(":memory:").await.unwrap();

        db.users().create(&alice()).await.unwrap();
        let result = db
            .users()
            .create(&NewUser {
                uuid: "uuid-456",
                username: "alice2",
                email: "alice@x.com",
                password_hash: "$2b$12$fakehash",
                terms_accepted: true,
            })
            .await;

        assert!(result.as_ref().is_err_and(is_unique_violation), "{result:?}");
    }

    #[tokio::test]
    async fn test_duplicate_username_fails() {
        let db = Database::open(":memory:").await.unwrap();

        db.users().create(&alice()).await.unwrap();
        let result = db
            .users()
            .create(&NewUser {
                uuid: "uuid-456",
                username: "ALICE",
                email: "other@x.com",
                password_hash: "$2b$12$fakehash",
                terms_accepted: true,
            })
            .await;

        assert!(result.as_ref().is_err_and(is_unique_violation), "{result:?}");
    }

    #[tokio::test]
    async fn test_soft_delete_frees_email_and_hides_user() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db.users().create(&alice()).await.unwrap();
        assert!(db.users().soft_delete(id).await.unwrap());

        assert!(db.users().get_by_uuid("uuid-123").await.unwrap().is_none());
        assert!(db.users().get_by_email("alice@x.com").await.unwrap().is_none());

        // A new account can claim the freed email/username
        db.users()
            .create(&NewUser {
                uuid: "uuid-456",
                username: "alice",
                email: "alice@x.com",
                password_hash: "$2b$12$fakehash",
                terms_accepted: true,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_email_verified_flips_once() {
        let db = Database::open(":memory:").await.unwrap();

        db.users().create(&alice()).await.unwrap();
        assert!(db.users().mark_email_verified("uuid-123").await.unwrap());
        assert!(!db.users().mark_email_verified("uuid-123").await.unwrap());

        let user = db.users().get_by_uuid("uuid-123").await.unwrap().unwrap();
        assert!(user.is_email_verified);
    }

    #[tokio::test]
    async fn test_login_retry_counter() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db.users().create(&alice()).await.unwrap();

        db.users().record_login_failure(id).await.unwrap();
        db.users().record_login_failure(id).await.unwrap();
        db.users().record_login_failure(id).await.unwrap();
        let user = db.users().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.login_retries, 3);
        assert_eq!(user.last_login, None);

        db.users().record_login_success(id, 1_700_000_000).await.unwrap();
        let user = db.users().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.login_retries, 0);
        assert_eq!(user.last_login, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_projection_excludes_password_hash() {
        let db = Database::open(":memory:").await.unwrap();

        db.users().create(&alice()).await.unwrap();
        let user = db.users().get_by_uuid("uuid-123").await.unwrap().unwrap();

        let projection = UserProjection::from(&user);
        let json = serde_json::to_string(&projection).unwrap();
        assert!(!json.contains("password"), "projection leaked a hash: {json}");
        assert!(!json.contains("$2b$"));
    }
}
