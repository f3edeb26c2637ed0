use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tictactoe_server::config::ServerConfig;
use tictactoe_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = config.bind_addr();

    if config.is_dev_mode() {
        warn!("GITHUB_CLIENT_ID not set: dev mode, logins create local dev_player accounts");
    }

    let (app, state) = tictactoe_server::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(state))
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    let closed = state.registry.close_all("Server shutting down");
    info!(closed, "shutting down");
}
