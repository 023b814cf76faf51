use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

/// Full account record, including the password hash.
/// Never serialized; handlers and the cache work with [`UserProjection`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_email_verified: bool,
    pub is_suspended: bool,
    pub terms_accepted: bool,
    pub last_login: Option<i64>,
    pub login_retries: i64,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    is_email_verified: i32,
    is_suspended: i32,
    terms_accepted: i32,
    last_login: Option<i64>,
    login_retries: i64,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: UserRole::from_str(&row.role),
            is_email_verified: row.is_email_verified != 0,
            is_suspended: row.is_suspended != 0,
            terms_accepted: row.terms_accepted != 0,
            last_login: row.last_login,
            login_retries: row.login_retries,
            created_at: row.created_at,
        }
    }
}

/// Sanitized projection of a user for caching and API responses.
/// Deliberately excludes the password hash and internal-only fields.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UserProjection {
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_email_verified: bool,
    pub is_suspended: bool,
    pub last_login: Option<i64>,
    pub created_at: String,
}

impl From<&User> for UserProjection {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.uuid.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            is_email_verified: user.is_email_verified,
            is_suspended: user.is_suspended,
            last_login: user.last_login,
            created_at: user.created_at.clone(),
        }
    }
}

/// Fields required to create an account.
pub struct NewUser<'a> {
    pub uuid: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub terms_accepted: bool,
}

const USER_COLUMNS: &str = "id, uuid, username, email, password_hash, role, is_email_verified, \
     is_suspended, terms_accepted, last_login, login_retries, created_at";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new account (unverified, not suspended). Returns the user ID.
    /// Fails with a unique violation if the email or username is already
    /// taken by a non-deleted account.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, username, email, password_hash, terms_accepted) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.uuid)
        .bind(user.username)
        .bind(user.email.to_lowercase())
        .bind(user.password_hash)
        .bind(user.terms_accepted as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by email (case-insensitive). Deleted accounts are invisible.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = ? AND is_deleted = 0",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by username (case-insensitive). Deleted accounts are invisible.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE username = ? AND is_deleted = 0",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID. Deleted accounts are invisible.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE uuid = ? AND is_deleted = 0",
            USER_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID. Deleted accounts are invisible.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE id = ? AND is_deleted = 0",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Mark a user's email as verified. The flag flips at most once;
    /// returns false if the user was already verified or does not exist.
    pub async fn mark_email_verified(&self, uuid: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET is_email_verified = 1 WHERE uuid = ? AND is_email_verified = 0 AND is_deleted = 0",
        )
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a failed password check: a single atomic increment, safe under
    /// concurrent failed logins for the same account.
    pub async fn record_login_failure(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET login_retries = login_retries + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a successful sign-in: reset the failure counter and stamp the
    /// login time in one statement.
    pub async fn record_login_success(&self, id: i64, last_login: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET login_retries = 0, last_login = ? WHERE id = ?")
            .bind(last_login)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the suspension flag. Administrative operation; callers must also
    /// invalidate the cached projection for the user.
    pub async fn set_suspended(&self, id: i64, suspended: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_suspended = ? WHERE id = ?")
            .bind(suspended as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete an account, freeing its email and username for reuse.
    /// Administrative operation; callers must also invalidate the cached
    /// projection for the user.
    pub async fn soft_delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
