use nas_sso_oidc::OpenIdDiscovery;
use nas_sso_server::{
    config::{DEFAULT_CONFIG_FILE, ServerConfig},
    routes,
    state::{AppState, Upstreams},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
    let config = ServerConfig::load(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        providers = config.providers.len(),
        "Loaded configuration"
    );

    let discovery = Arc::new(OpenIdDiscovery::new(config.sso.http_timeout())?);
    let app_state = Arc::new(AppState::from_config(&config, discovery, Upstreams::default()).await?);

    // Spawn periodic cleanup of expired states and sessions
    let cleanup_state = Arc::clone(&app_state);
    let cleanup_interval_secs = config.purge_interval_seconds.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            let (states, sessions) = cleanup_state.purge_expired().await;
            if states + sessions > 0 {
                tracing::debug!(
                    deleted_states = states,
                    deleted_sessions = sessions,
                    "Periodic cleanup"
                );
            }
        }
    });

    let app = routes::router(app_state, config.sso.callback_path());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
