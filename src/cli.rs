//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::cache::SessionCache;
use crate::db::Database;
use clap::Parser;
use tracing::{error, info};
use url::Url;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "flashauth",
    about = "Token-based authentication service with rotating refresh tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7310")]
    pub port: u16,

    /// Path to the SQLite user directory file
    #[arg(short, long, default_value = "flashauth.db")]
    pub database: String,

    /// Path to the SQLite session cache file
    #[arg(short, long, default_value = "flashauth-cache.db")]
    pub cache: String,

    /// Frontend base URL used in verification links and to decide cookie
    /// security (HTTPS origins get Secure cookies)
    #[arg(long, default_value = "http://localhost:3000")]
    pub frontend_url: String,

    /// Disable new account signups
    #[arg(long)]
    pub no_signup: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a token signing secret from the given environment variable.
/// Returns None and logs an error if the secret is missing or too short.
pub fn load_token_secret(var: &str) -> Option<String> {
    let Ok(secret) = std::env::var(var) else {
        error!(
            "{} is required. Set it to a random string of at least {} characters",
            var, MIN_TOKEN_SECRET_LENGTH
        );
        return None;
    };

    // Clear the environment variable to prevent leaking.
    // SAFETY: We're single-threaded at this point during startup,
    // and no other code is reading this environment variable.
    unsafe { std::env::remove_var(var) };

    if secret.len() < MIN_TOKEN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            var, MIN_TOKEN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse and validate the frontend URL.
/// Returns None and logs an error if validation fails.
pub fn validate_frontend_url(frontend_url: &str) -> Option<Url> {
    let url = match Url::parse(frontend_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %frontend_url, error = %e, "Invalid frontend URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("Frontend URL must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Open the user directory database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Open the session cache, logging errors if it fails.
pub async fn open_cache(path: &str) -> Option<SessionCache> {
    match SessionCache::open(path).await {
        Ok(cache) => {
            info!(path = %path, "Session cache opened");
            Some(cache)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open session cache");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    cache: SessionCache,
    frontend_url: Url,
    access_secret: String,
    refresh_secret: String,
    no_signup: bool,
) -> ServerConfig {
    let secure_cookies = frontend_url.scheme() == "https";

    ServerConfig {
        db,
        cache,
        frontend_url: frontend_url.to_string(),
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        secure_cookies,
        no_signup,
    }
}
