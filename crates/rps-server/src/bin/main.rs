use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rps_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    let addr = config.bind_addr.clone();
    info!(
        max_connections = config.max_connections,
        rate_limit = config.rate_limit,
        move_timeout_secs = config.move_timeout.map(|t| t.as_secs()),
        "Starting rps-server"
    );

    let (app, _state) = rps_server::build_app(config).await;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
