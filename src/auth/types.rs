//! Session types passed explicitly through the call chain.

use crate::db::UserProjection;
use crate::jwt::{AccessTokenResult, RefreshTokenResult};

/// Result of authenticating a request: the resolved principal and, when the
/// access token had to be re-minted from the refresh token, the replacement
/// the transport layer must attach to its response.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The authenticated principal (sanitized projection, no password hash).
    pub user: UserProjection,
    /// Freshly minted access token, if the presented one was absent/expired.
    pub new_access: Option<AccessTokenResult>,
}

/// Result of a successful sign-in or rotation: the principal plus a full
/// credential pair for the transport layer to persist.
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: UserProjection,
    pub access: AccessTokenResult,
    pub refresh: RefreshTokenResult,
}
