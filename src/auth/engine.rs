//! The authentication engine.
//!
//! Resolves a pair of possibly-absent credentials into a verified principal,
//! owns sign-up/sign-in/sign-out, and runs the refresh rotation protocol.
//! All collaborators (directory, cache, codec, email queue) are injected
//! handles owned by the composition root; the engine has no global state.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::db::{Database, NewUser, UserProjection, is_unique_violation};
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, JwtConfig, REFRESH_TOKEN_DURATION_SECS};
use crate::queue::{EmailJob, EmailQueue, verification_link};

use super::errors::AuthError;
use super::types::{SessionContext, SignedIn};

/// bcrypt cost factor for password hashing.
const BCRYPT_COST: u32 = 12;

/// Fields required to open an account.
pub struct NewSignup<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub terms_accepted: bool,
}

#[derive(Clone)]
pub struct AuthEngine {
    jwt: Arc<JwtConfig>,
    db: Database,
    cache: SessionCache,
    emails: EmailQueue,
    frontend_url: String,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl AuthEngine {
    pub fn new(
        jwt: Arc<JwtConfig>,
        db: Database,
        cache: SessionCache,
        emails: EmailQueue,
        frontend_url: String,
    ) -> Self {
        Self {
            jwt,
            db,
            cache,
            emails,
            frontend_url,
        }
    }

    /// Resolve `(access_token?, refresh_token?)` into a principal.
    ///
    /// A valid access token authenticates on its own. An absent, expired, or
    /// undecodable access token falls through to the refresh token, which -
    /// if its signature verifies and its JTI still has a live cache record -
    /// yields the principal plus a replacement access token. The refresh
    /// token itself is not consumed here; that is `rotate`'s job.
    pub async fn authenticate(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
    ) -> Result<SessionContext, AuthError> {
        if let Some(token) = access {
            match self.jwt.validate_access_token(token) {
                Ok(claims) => {
                    let user = self.resolve_principal(&claims.sub).await?;
                    self.check_status(&user)?;
                    return Ok(SessionContext {
                        user,
                        new_access: None,
                    });
                }
                Err(e) if e.is_recoverable() && refresh.is_some() => {
                    debug!(error = %e, "Access token rejected, trying refresh token");
                }
                Err(e) => {
                    debug!(error = %e, "Access token rejected");
                    return Err(AuthError::Unauthenticated);
                }
            }
        }

        let Some(token) = refresh else {
            return Err(AuthError::Unauthenticated);
        };

        let claims = self.jwt.validate_refresh_token(token).map_err(|e| {
            debug!(error = %e, "Refresh token rejected");
            AuthError::Unauthenticated
        })?;

        self.check_refresh_live(&claims.jti).await?;

        let user = self.resolve_principal(&claims.sub).await?;
        self.check_status(&user)?;

        let new_access = self
            .jwt
            .generate_access_token(&user.uuid)
            .map_err(|e| AuthError::fail_closed("Failed to generate access token", e))?;

        Ok(SessionContext {
            user,
            new_access: Some(new_access),
        })
    }

    /// Open a new account: unverified, not suspended, with a queued
    /// verification email.
    pub async fn sign_up(&self, signup: NewSignup<'_>) -> Result<UserProjection, AuthError> {
        if !signup.terms_accepted {
            return Err(AuthError::Validation(
                "You must accept the terms and conditions".to_string(),
            ));
        }

        // Pre-checks give the original's distinct messages; the partial
        // unique indexes remain the authoritative backstop under races.
        let existing = self
            .db
            .users()
            .get_by_email(signup.email)
            .await
            .map_err(|e| AuthError::internal("Failed to look up email", e))?;
        if existing.is_some() {
            return Err(AuthError::Conflict("User already exists".to_string()));
        }

        let existing = self
            .db
            .users()
            .get_by_username(signup.username)
            .await
            .map_err(|e| AuthError::internal("Failed to look up username", e))?;
        if existing.is_some() {
            return Err(AuthError::Conflict("Username already exists".to_string()));
        }

        let password_hash = bcrypt::hash(signup.password, BCRYPT_COST)
            .map_err(|e| AuthError::internal("Failed to hash password", e))?;

        let uuid = Uuid::new_v4().to_string();
        let created = self
            .db
            .users()
            .create(&NewUser {
                uuid: &uuid,
                username: signup.username,
                email: signup.email,
                password_hash: &password_hash,
                terms_accepted: signup.terms_accepted,
            })
            .await;

        match created {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AuthError::Conflict("User already exists".to_string()));
            }
            Err(e) => return Err(AuthError::internal("Failed to create user", e)),
        }

        let user = self
            .db
            .users()
            .get_by_uuid(&uuid)
            .await
            .map_err(|e| AuthError::internal("Failed to load created user", e))?
            .ok_or_else(|| AuthError::Internal("Created user vanished".to_string()))?;

        let projection = UserProjection::from(&user);
        self.send_verification_email(&projection);
        self.cache
            .store_user(&projection, ACCESS_TOKEN_DURATION_SECS)
            .await;

        Ok(projection)
    }

    /// Check a credential pair and issue a fresh session.
    ///
    /// Unknown email and wrong password fail identically. A wrong password
    /// atomically bumps the failure counter; a success resets it and stamps
    /// the login time.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AuthError> {
        let user = self
            .db
            .users()
            .get_by_email(email)
            .await
            .map_err(|e| AuthError::internal("Failed to look up user", e))?
            .ok_or(AuthError::InvalidCredentials)?;

        let valid = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| AuthError::internal("Failed to verify password", e))?;
        if !valid {
            if let Err(e) = self.db.users().record_login_failure(user.id).await {
                warn!(error = %e, "Failed to record login failure");
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_email_verified {
            self.send_verification_email(&UserProjection::from(&user));
            return Err(AuthError::EmailUnverified(user.email.clone()));
        }

        if user.is_suspended {
            return Err(AuthError::Suspended);
        }

        let (access, refresh) = self.issue_credentials(&user.uuid).await?;

        let now = unix_now();
        self.db
            .users()
            .record_login_success(user.id, now)
            .await
            .map_err(|e| AuthError::internal("Failed to record login", e))?;

        // Refresh the cached projection so the stamped login time and reset
        // counter are visible to subsequent reads.
        let mut projection = UserProjection::from(&user);
        projection.last_login = Some(now);
        self.cache
            .store_user(&projection, ACCESS_TOKEN_DURATION_SECS)
            .await;

        Ok(SignedIn {
            user: projection,
            access,
            refresh,
        })
    }

    /// Rotate a refresh token: exactly-once semantics per token.
    ///
    /// The used-marker is written before the companion record is consumed,
    /// so a crash between the two re-rejects a retried token rather than
    /// leaving two valid sessions.
    pub async fn rotate(&self, token: &str) -> Result<SignedIn, AuthError> {
        let claims = self.jwt.validate_refresh_token(token).map_err(|e| {
            debug!(error = %e, "Refresh token rejected");
            AuthError::Unauthenticated
        })?;

        let used = self
            .cache
            .is_used(&claims.jti)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to check replay marker", e))?;
        if used {
            // Defense in depth: make sure the companion record is gone too.
            if let Err(e) = self.cache.revoke_refresh(&claims.jti).await {
                warn!(error = %e, "Failed to revoke replayed refresh token");
            }
            warn!(sub = %claims.sub, "Refresh token replay detected");
            return Err(AuthError::ReplayDetected);
        }

        self.cache
            .mark_used(&claims.jti)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to write replay marker", e))?;

        let subject = self
            .cache
            .consume_refresh(&claims.jti)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to consume refresh token", e))?;
        let Some(subject) = subject else {
            // Never issued, expired, or lost a concurrent rotation race.
            return Err(AuthError::Unauthenticated);
        };

        let user = self.resolve_principal(&subject).await?;
        self.check_status(&user)?;

        let (access, refresh) = self.issue_credentials(&user.uuid).await?;

        Ok(SignedIn {
            user,
            access,
            refresh,
        })
    }

    /// Revoke a refresh token's server-side record. Never fails: sign-out
    /// must succeed even with an invalid or expired token so a client can
    /// always clear its session.
    pub async fn sign_out(&self, refresh: Option<&str>) {
        let Some(token) = refresh else {
            return;
        };
        match self.jwt.validate_refresh_token(token) {
            Ok(claims) => {
                if let Err(e) = self.cache.revoke_refresh(&claims.jti).await {
                    warn!(error = %e, "Failed to revoke refresh token on sign-out");
                }
            }
            Err(e) => debug!(error = %e, "Ignoring invalid refresh token on sign-out"),
        }
    }

    /// Flip the email-verified flag from a verification token.
    pub async fn verify_email(&self, token: &str) -> Result<UserProjection, AuthError> {
        let claims = self
            .jwt
            .validate_verify_token(token)
            .map_err(|_| AuthError::Validation("Invalid verification token".to_string()))?;

        if let Some(cached) = self.cache.get_user(&claims.sub).await {
            if cached.is_email_verified {
                return Err(AuthError::Validation("Email already verified".to_string()));
            }
        }

        let updated = self
            .db
            .users()
            .mark_email_verified(&claims.sub)
            .await
            .map_err(|e| AuthError::internal("Failed to verify email", e))?;

        if !updated {
            let user = self
                .db
                .users()
                .get_by_uuid(&claims.sub)
                .await
                .map_err(|e| AuthError::internal("Failed to load user", e))?;
            return Err(match user {
                Some(u) if u.is_email_verified => {
                    AuthError::Validation("Email already verified".to_string())
                }
                _ => AuthError::Validation("User not found".to_string()),
            });
        }

        // The cached copy is stale on the decisive flag - drop it.
        self.cache.invalidate_user(&claims.sub).await;

        let user = self
            .db
            .users()
            .get_by_uuid(&claims.sub)
            .await
            .map_err(|e| AuthError::internal("Failed to load user", e))?
            .ok_or_else(|| AuthError::Validation("User not found".to_string()))?;

        Ok(UserProjection::from(&user))
    }

    /// Profile fetch for an authenticated subject (cache-then-directory).
    pub async fn me(&self, sub: &str) -> Result<UserProjection, AuthError> {
        self.resolve_principal(sub).await
    }

    /// Read-through principal resolution: cache first, directory on miss,
    /// populating the cache with a sanitized projection for the access-token
    /// window. Directory errors fail closed.
    async fn resolve_principal(&self, sub: &str) -> Result<UserProjection, AuthError> {
        if let Some(user) = self.cache.get_user(sub).await {
            return Ok(user);
        }

        let user = self
            .db
            .users()
            .get_by_uuid(sub)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to load user", e))?
            .ok_or(AuthError::Unauthenticated)?;

        let projection = UserProjection::from(&user);
        self.cache
            .store_user(&projection, ACCESS_TOKEN_DURATION_SECS)
            .await;
        Ok(projection)
    }

    /// Account-status invariants, applied after every successful resolution.
    /// Suspension wins over the unverified state: it is terminal, while
    /// verification is remediable.
    fn check_status(&self, user: &UserProjection) -> Result<(), AuthError> {
        if user.is_suspended {
            return Err(AuthError::Suspended);
        }
        if !user.is_email_verified {
            return Err(AuthError::EmailUnverified(user.email.clone()));
        }
        Ok(())
    }

    /// Require a live companion record for a refresh JTI, reporting replay
    /// of an already-rotated token distinctly. Cache errors fail closed: the
    /// cache is the source of truth for refresh-token validity.
    async fn check_refresh_live(&self, jti: &str) -> Result<(), AuthError> {
        let used = self
            .cache
            .is_used(jti)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to check replay marker", e))?;
        if used {
            if let Err(e) = self.cache.revoke_refresh(jti).await {
                warn!(error = %e, "Failed to revoke replayed refresh token");
            }
            return Err(AuthError::ReplayDetected);
        }

        let live = self
            .cache
            .refresh_subject(jti)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to check refresh token record", e))?;
        if live.is_none() {
            return Err(AuthError::Unauthenticated);
        }
        Ok(())
    }

    /// Mint an access/refresh pair and register the refresh JTI in the
    /// cache. Registration failure fails closed - an unregistered refresh
    /// token would be unusable anyway.
    async fn issue_credentials(
        &self,
        sub: &str,
    ) -> Result<(crate::jwt::AccessTokenResult, crate::jwt::RefreshTokenResult), AuthError> {
        let access = self
            .jwt
            .generate_access_token(sub)
            .map_err(|e| AuthError::fail_closed("Failed to generate access token", e))?;
        let refresh = self
            .jwt
            .generate_refresh_token(sub)
            .map_err(|e| AuthError::fail_closed("Failed to generate refresh token", e))?;

        self.cache
            .register_refresh(&refresh.jti, sub, REFRESH_TOKEN_DURATION_SECS)
            .await
            .map_err(|e| AuthError::fail_closed("Failed to register refresh token", e))?;

        Ok((access, refresh))
    }

    /// Queue a verification email for an unverified account. Fire-and-forget;
    /// a codec failure here is logged and skipped rather than failing the
    /// calling operation.
    fn send_verification_email(&self, user: &UserProjection) {
        let token = match self.jwt.generate_verify_token(&user.uuid) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to generate verification token");
                return;
            }
        };

        self.emails.enqueue(EmailJob::SendVerificationEmail {
            to: user.email.clone(),
            subject_id: user.uuid.clone(),
            username: user.username.clone(),
            verification_link: verification_link(&self.frontend_url, &token),
        });
    }
}
