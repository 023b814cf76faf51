use std::net::SocketAddr;

use clap::Parser;
use flashauth::cli::{
    Args, build_config, init_logging, load_token_secret, open_cache, open_database,
    validate_frontend_url,
};
use flashauth::{create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(access_secret) = load_token_secret("ACCESS_TOKEN_SECRET") else {
        std::process::exit(1);
    };
    let Some(refresh_secret) = load_token_secret("REFRESH_TOKEN_SECRET") else {
        std::process::exit(1);
    };

    let Some(frontend_url) = validate_frontend_url(&args.frontend_url) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let Some(cache) = open_cache(&args.cache).await else {
        std::process::exit(1);
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap();

    let config = build_config(
        db,
        cache,
        frontend_url,
        access_secret,
        refresh_secret,
        args.no_signup,
    );

    init_cleanup(&config.cache).await;
    let app = create_app(&config);

    info!(address = %local_addr, "Listening");

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
