//! Authentication: token-based session lifecycle.
//!
//! Dual-token system: short-lived access tokens (15 min, stateless) and
//! longer-lived refresh tokens (24 h, single-use, tracked in the session
//! cache by JTI). Access tokens are automatically re-minted via the refresh
//! token when expired; rotation replaces the whole pair and detects replays.

mod cookie;
mod engine;
mod errors;
mod extractors;
mod state;
mod types;

pub use cookie::{
    ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie, credential_cookie, get_cookie,
};
pub use engine::{AuthEngine, NewSignup};
pub use errors::AuthError;
pub use extractors::{Auth, NEW_ACCESS_TOKEN_COOKIE, attach_session_cookies};
pub use state::HasAuthBackend;
pub use types::{SessionContext, SignedIn};
