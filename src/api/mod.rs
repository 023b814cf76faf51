mod auth;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::auth::AuthEngine;
use crate::rate_limit::RateLimitConfig;

pub use auth::AuthApiState;
pub use users::UsersApiState;

/// Create the API router.
pub fn create_api_router(engine: AuthEngine, no_signup: bool) -> Router {
    let rate_limit_config = Arc::new(RateLimitConfig::new());

    let auth_state = AuthApiState {
        engine: engine.clone(),
        rate_limit_config,
        no_signup,
    };

    let users_state = UsersApiState { engine };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .nest("/user", users::router(users_state))
}
