//! Authentication API endpoints.
//!
//! - POST `/signup` - Create an account and queue a verification email
//! - POST `/signin` - Exchange credentials for an access/refresh cookie pair
//! - POST `/signout` - Revoke the refresh token and clear cookies
//! - POST `/refresh` - Rotate the refresh token (single-use)
//! - POST `/verify-email` - Redeem an email verification token

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    middleware,
    response::{AppendHeaders, IntoResponse},
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{
    ACCESS_COOKIE_NAME, AuthEngine, AuthError, NewSignup, REFRESH_COOKIE_NAME, SignedIn,
    clear_cookie, credential_cookie, get_cookie,
};
use crate::db::UserProjection;
use crate::impl_has_auth_backend;
use crate::rate_limit::{
    RateLimitConfig, rate_limit_refresh, rate_limit_sign_in, rate_limit_sign_up,
};

#[derive(Clone)]
pub struct AuthApiState {
    pub engine: AuthEngine,
    pub rate_limit_config: Arc<RateLimitConfig>,
    pub no_signup: bool,
}

impl_has_auth_backend!(AuthApiState);

pub fn router(state: AuthApiState) -> Router {
    let mut router = Router::new()
        .route(
            "/signin",
            post(sign_in).layer(middleware::from_fn_with_state(
                state.rate_limit_config.clone(),
                rate_limit_sign_in,
            )),
        )
        .route("/signout", post(sign_out))
        .route(
            "/refresh",
            post(refresh).layer(middleware::from_fn_with_state(
                state.rate_limit_config.clone(),
                rate_limit_refresh,
            )),
        )
        .route("/verify-email", post(verify_email));

    if !state.no_signup {
        router = router.route(
            "/signup",
            post(sign_up).layer(middleware::from_fn_with_state(
                state.rate_limit_config.clone(),
                rate_limit_sign_up,
            )),
        );
    }

    router.with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    email: String,
    username: String,
    password: String,
    #[serde(default)]
    is_term_and_condition_accepted: bool,
}

#[derive(Serialize)]
struct UserResponse {
    message: &'static str,
    user: UserProjection,
}

/// Lightweight input bounds; the engine and the directory's unique indexes
/// enforce the real invariants.
fn validate_signup(payload: &SignupRequest) -> Result<(), AuthError> {
    if payload.email.is_empty() || payload.username.is_empty() || payload.password.is_empty() {
        return Err(AuthError::Validation("Incomplete signup data".to_string()));
    }
    if !payload.email.contains('@') {
        return Err(AuthError::Validation("Invalid email address".to_string()));
    }
    if payload.username.len() < 3 || payload.username.len() > 30 {
        return Err(AuthError::Validation(
            "Username must be between 3 and 30 characters".to_string(),
        ));
    }
    if payload.password.len() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }
    Ok(())
}

async fn sign_up(
    State(state): State<AuthApiState>,
    Json(payload): Json<SignupRequest>,
) -> Result<impl IntoResponse, AuthError> {
    validate_signup(&payload)?;

    let user = state
        .engine
        .sign_up(NewSignup {
            email: &payload.email,
            username: &payload.username,
            password: &payload.password,
            terms_accepted: payload.is_term_and_condition_accepted,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            message: "Account created. Please verify your email",
            user,
        }),
    ))
}

#[derive(Deserialize)]
struct SigninRequest {
    email: String,
    password: String,
}

/// Build the Set-Cookie pair for a freshly issued session.
fn session_cookies(signed_in: &SignedIn) -> AppendHeaders<[(axum::http::HeaderName, String); 2]> {
    AppendHeaders([
        (
            SET_COOKIE,
            credential_cookie(
                ACCESS_COOKIE_NAME,
                &signed_in.access.token,
                signed_in.access.duration,
            ),
        ),
        (
            SET_COOKIE,
            credential_cookie(
                REFRESH_COOKIE_NAME,
                &signed_in.refresh.token,
                signed_in.refresh.duration,
            ),
        ),
    ])
}

async fn sign_in(
    State(state): State<AuthApiState>,
    Json(payload): Json<SigninRequest>,
) -> Result<impl IntoResponse, AuthError> {
    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(AuthError::Validation(
            "Email and password are required fields".to_string(),
        ));
    }

    let signed_in = state.engine.sign_in(&payload.email, &payload.password).await?;

    Ok((
        StatusCode::OK,
        session_cookies(&signed_in),
        Json(UserResponse {
            message: "Signed in successfully",
            user: signed_in.user,
        }),
    ))
}

/// Sign-out never fails: the refresh token record is revoked best-effort and
/// both cookies are cleared regardless of token validity.
async fn sign_out(
    State(state): State<AuthApiState>,
    request: axum::extract::Request,
) -> impl IntoResponse {
    let (parts, _body) = request.into_parts();

    state
        .engine
        .sign_out(get_cookie(&parts.headers, REFRESH_COOKIE_NAME))
        .await;

    (
        StatusCode::OK,
        AppendHeaders([
            (SET_COOKIE, clear_cookie(ACCESS_COOKIE_NAME)),
            (SET_COOKIE, clear_cookie(REFRESH_COOKIE_NAME)),
        ]),
        Json(serde_json::json!({ "message": "Signed out successfully" })),
    )
}

/// Rotate the refresh token. The presented token is consumed; the response
/// carries a complete replacement credential pair.
async fn refresh(
    State(state): State<AuthApiState>,
    request: axum::extract::Request,
) -> Result<impl IntoResponse, AuthError> {
    let (parts, _body) = request.into_parts();

    let token =
        get_cookie(&parts.headers, REFRESH_COOKIE_NAME).ok_or(AuthError::Unauthenticated)?;

    let signed_in = state.engine.rotate(token).await?;

    Ok((
        StatusCode::OK,
        session_cookies(&signed_in),
        Json(UserResponse {
            message: "Tokens refreshed",
            user: signed_in.user,
        }),
    ))
}

#[derive(Deserialize)]
struct VerifyEmailRequest {
    token: String,
}

async fn verify_email(
    State(state): State<AuthApiState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AuthError> {
    if payload.token.is_empty() {
        return Err(AuthError::Validation("Token is required".to_string()));
    }

    let user = state.engine.verify_email(&payload.token).await?;

    Ok((
        StatusCode::OK,
        Json(UserResponse {
            message: "Email verified successfully",
            user,
        }),
    ))
}
