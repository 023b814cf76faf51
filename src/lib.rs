pub mod api;
pub mod auth;
pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod queue;
pub mod rate_limit;
pub mod server_config;

use api::create_api_router;
use auth::{AuthEngine, attach_session_cookies};
use axum::{Router, middleware};
use cache::SessionCache;
use db::Database;
use jwt::JwtConfig;
use queue::{EmailQueue, spawn_email_worker};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// User directory connection (cloneable, uses a connection pool internally)
    pub db: Database,
    /// Session cache connection (cloneable, uses a connection pool internally)
    pub cache: SessionCache,
    /// Secret for signing access and email verification tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens (distinct from the access secret)
    pub refresh_secret: Vec<u8>,
    /// Frontend base URL, used in verification links
    pub frontend_url: String,
    /// Whether to set Secure flag on cookies (true in production with HTTPS)
    pub secure_cookies: bool,
    /// Whether new account signups are disabled
    pub no_signup: bool,
}

/// Create the application router with the given configuration.
/// Must be called from within a tokio runtime (spawns the email worker).
pub fn create_app(config: &ServerConfig) -> Router {
    server_config::init(config.secure_cookies);

    let jwt = Arc::new(JwtConfig::new(&config.access_secret, &config.refresh_secret));

    let (emails, email_rx) = EmailQueue::channel();
    spawn_email_worker(email_rx);

    let engine = AuthEngine::new(
        jwt,
        config.db.clone(),
        config.cache.clone(),
        emails,
        config.frontend_url.clone(),
    );

    Router::new()
        .nest("/api/v1", create_api_router(engine, config.no_signup))
        .layer(middleware::from_fn(attach_session_cookies))
}

/// Run cleanup once and spawn the background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(cache: &SessionCache) {
    cleanup::run_cleanup(cache).await;
    cleanup::spawn_cleanup_scheduler(cache.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let
/// the OS choose a random port. Returns the actual address the server is
/// listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> (tokio::task::JoinHandle<()>, SocketAddr) {
    // Run cleanup tasks on startup
    init_cleanup(&config.cache).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    let local_addr = listener.local_addr().expect("Failed to get local address");

    let handle = tokio::spawn(async move {
        run_server(config, listener).await.ok();
    });

    (handle, local_addr)
}
