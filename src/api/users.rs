//! User profile API endpoints.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::auth::{Auth, AuthEngine, AuthError};
use crate::db::UserProjection;
use crate::impl_has_auth_backend;

#[derive(Clone)]
pub struct UsersApiState {
    pub engine: AuthEngine,
}

impl_has_auth_backend!(UsersApiState);

pub fn router(state: UsersApiState) -> Router {
    Router::new().route("/me", get(me)).with_state(state)
}

#[derive(Serialize)]
struct MeResponse {
    user: UserProjection,
}

/// Current user's profile: a read-through fetch keyed by the authenticated
/// subject, served from the cache the extractor just warmed.
async fn me(
    State(state): State<UsersApiState>,
    Auth(session): Auth,
) -> Result<impl IntoResponse, AuthError> {
    let user = state.engine.me(&session.user.uuid).await?;
    Ok(Json(MeResponse { user }))
}
