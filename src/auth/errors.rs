//! Authentication error taxonomy.
//!
//! Every failure from the token codec, session cache, or user directory is
//! re-classified into one of these variants before it crosses the component
//! boundary; raw sqlx/jsonwebtoken errors never reach a response.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie};

/// Errors produced by the authentication engine.
#[derive(Debug)]
pub enum AuthError {
    /// Bad email/password pair. Deliberately identical for an unknown email
    /// and a wrong password, to prevent account enumeration.
    InvalidCredentials,
    /// No usable credential. Also the fail-closed classification for any
    /// unexpected error on the authenticate/rotate paths.
    Unauthenticated,
    /// Account suspended. Terminal; wins over the unverified-email state.
    Suspended,
    /// Valid principal with an unverified email. Carries the email so the
    /// transport layer can scope the verify-email allowance.
    EmailUnverified(String),
    /// A refresh token was presented again after it had already been
    /// rotated. Security-significant: likely token theft.
    ReplayDetected,
    /// Duplicate email or username at signup.
    Conflict(String),
    /// Invalid request input (missing terms acceptance, bad verification
    /// token, malformed fields).
    Validation(String),
    /// Internal failure on a non-authentication operation.
    Internal(String),
}

impl AuthError {
    /// Classify an internal error on a non-authentication path, logging the
    /// cause without leaking it to the client.
    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal(context.to_string())
    }

    /// Classify an unexpected error on an authentication path: log and fail
    /// closed. Leaking internal error detail on an auth path is itself a
    /// security risk.
    pub fn fail_closed(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Unauthenticated
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::Unauthenticated
            | AuthError::Suspended
            | AuthError::ReplayDetected => StatusCode::UNAUTHORIZED,
            AuthError::EmailUnverified(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::Conflict(_) | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Email or password is incorrect".to_string(),
            AuthError::Unauthenticated => "Not authenticated".to_string(),
            AuthError::Suspended => "Your account is currently suspended".to_string(),
            AuthError::EmailUnverified(_) => "Your email is yet to be verified".to_string(),
            AuthError::ReplayDetected => "Refresh token reuse detected".to_string(),
            AuthError::Conflict(msg) | AuthError::Validation(msg) => msg.clone(),
            AuthError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Machine-readable detail the transport layer consumes.
    fn detail(&self) -> Option<String> {
        match self {
            AuthError::EmailUnverified(email) => Some(format!("email-unverified:{}", email)),
            _ => None,
        }
    }

    /// Whether the response should clear both credential cookies. Terminal
    /// auth failures do; the unverified-email state keeps the refresh token
    /// alive so the client can still reach the verify-email endpoint.
    fn clears_credentials(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthenticated | AuthError::Suspended | AuthError::ReplayDetected
        )
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AuthError {}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        use axum::http::HeaderValue;

        let clears = self.clears_credentials();
        let mut response = (
            self.status_code(),
            Json(ErrorResponse {
                detail: self.detail(),
                error: self.message(),
            }),
        )
            .into_response();

        if clears {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&clear_cookie(ACCESS_COOKIE_NAME)) {
                headers.append(header::SET_COOKIE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&clear_cookie(REFRESH_COOKIE_NAME)) {
                headers.append(header::SET_COOKIE, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_safe_messages() {
        // Unknown email and wrong password must be indistinguishable.
        assert_eq!(
            AuthError::InvalidCredentials.message(),
            AuthError::InvalidCredentials.message()
        );
        assert!(AuthError::InvalidCredentials.detail().is_none());
    }

    #[test]
    fn test_unverified_detail_carries_email() {
        let err = AuthError::EmailUnverified("alice@x.com".to_string());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.detail().as_deref(), Some("email-unverified:alice@x.com"));
        assert!(!err.clears_credentials());
    }

    #[test]
    fn test_terminal_failures_clear_credentials() {
        assert!(AuthError::Unauthenticated.clears_credentials());
        assert!(AuthError::Suspended.clears_credentials());
        assert!(AuthError::ReplayDetected.clears_credentials());
        assert!(!AuthError::InvalidCredentials.clears_credentials());
        assert!(!AuthError::Conflict("x".into()).clears_credentials());
    }
}
