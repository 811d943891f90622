use anyhow::Result;
use std::sync::Arc;

use enphase_proxy::auth::{CredentialsManager, CredentialsUpdater};
use enphase_proxy::config::Config;
use enphase_proxy::http_client::LocalApiClient;
use enphase_proxy::{middleware, routes};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        "Enphase proxy starting, version {}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Initialize credentials
    let manager = CredentialsManager::new(config.remote_api())?;
    if manager.uses_static_token() {
        tracing::info!("Using the configured local API token, the Enphase cloud will not be contacted");
    }

    // No credential means nothing useful to serve, so a failure here is fatal
    let updater = match CredentialsUpdater::start(Arc::new(manager), config.updater_settings()).await {
        Ok(updater) => Arc::new(updater),
        Err(e) => {
            tracing::error!("Authentication failed: {:#}", e);
            return Err(e);
        }
    };
    tracing::info!("Credentials ready");

    // Initialize local API client
    let local_api = Arc::new(LocalApiClient::new(
        &config.local_api_url,
        updater.clone(),
        config.http_timeout,
    )?);
    tracing::info!("Local API client initialized for {}", config.local_api_url);

    let app_state = routes::AppState {
        updater: updater.clone(),
        local_api,
    };

    // Build the application with routes and middleware
    let app = build_app(app_state);

    // Bind to configured host and port
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop the updater even if the server failed
    updater.shutdown().await;
    served?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Build the application with all routes and middleware
fn build_app(state: routes::AppState) -> axum::Router {
    use axum::Router;

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::proxy_routes(state))
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(middleware::cors_layer())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
