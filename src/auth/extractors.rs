//! Axum extractors binding the authentication engine to HTTP.

use std::cell::RefCell;

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, credential_cookie, get_cookie};
use super::errors::AuthError;
use super::state::HasAuthBackend;
use super::types::SessionContext;

tokio::task_local! {
    /// Task-local storage for a freshly minted access token cookie.
    /// Used to pass the cookie from the auth extractor to the response
    /// middleware.
    pub static NEW_ACCESS_TOKEN_COOKIE: RefCell<Option<String>>;
}

/// Extractor for endpoints that require authentication.
///
/// Reads both credential cookies, runs the engine's `authenticate`, and -
/// when the engine minted a replacement access token - stashes its cookie in
/// the task-local for [`attach_session_cookies`] to attach to the response.
pub struct Auth(pub SessionContext);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = get_cookie(&parts.headers, ACCESS_COOKIE_NAME);
        let refresh = get_cookie(&parts.headers, REFRESH_COOKIE_NAME);

        let session = state.engine().authenticate(access, refresh).await?;

        if let Some(ref new_access) = session.new_access {
            let cookie =
                credential_cookie(ACCESS_COOKIE_NAME, &new_access.token, new_access.duration);
            let _ = NEW_ACCESS_TOKEN_COOKIE.try_with(|cell| {
                cell.borrow_mut().replace(cookie);
            });
        }

        Ok(Auth(session))
    }
}

/// Middleware that scopes the task-local and appends any access token cookie
/// the extractor minted during the request.
pub async fn attach_session_cookies(request: Request, next: Next) -> Response {
    NEW_ACCESS_TOKEN_COOKIE
        .scope(RefCell::new(None), async move {
            let mut response = next.run(request).await;

            let new_cookie = NEW_ACCESS_TOKEN_COOKIE.with(|cell| cell.borrow_mut().take());
            if let Some(cookie) = new_cookie {
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
            }

            response
        })
        .await
}
