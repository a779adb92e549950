use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

mod auth;
mod config;
mod converters;
mod error;
mod middleware;
mod routes;
mod streaming;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load();

    // Initialize logging with the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    tracing::info!("Copilot Gateway starting...");

    let oauth_token = auth::discover_oauth_token(config.oauth_token.as_deref())
        .context("GitHub OAuth token lookup failed")?;

    // Obtain an initial Copilot token; without one every request would fail
    let auth_manager = Arc::new(auth::AuthManager::new(oauth_token)?);
    auth_manager
        .refresh(true)
        .await
        .context("failed to obtain a Copilot token during startup")?;
    let _refresh_task = auth_manager.spawn_refresh_task();

    if config.api_key_generated {
        tracing::warn!("API_KEY not set; generated a random access token");
    }
    tracing::info!("API key: {}", config.api_key);

    // No overall timeout: streaming responses stay open indefinitely
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let state = routes::AppState {
        access_token: config.api_key.clone(),
        auth: auth_manager,
        client,
    };
    let app = build_app(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Build the application with CORS applied around every route
fn build_app(state: routes::AppState) -> axum::Router {
    routes::api_routes(state).layer(axum::middleware::from_fn(middleware::cors_middleware))
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
