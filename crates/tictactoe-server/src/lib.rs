pub mod config;
pub mod connections;
pub mod db;
pub mod error;
pub mod identity;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build a fully configured Router + shared state.
///
/// Also spawns the idle-session sweep, so this must run inside a tokio runtime.
pub async fn build_app(config: ServerConfig) -> Result<(Router, Arc<AppState>), sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    db::init_db(&pool).await?;

    let static_dir = ServeDir::new(&config.static_dir);
    let state = Arc::new(AppState::new(pool, config));

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.sweep_interval);
            loop {
                interval.tick().await;
                let expired = state
                    .registry
                    .expire_idle(state.config.session_idle_timeout);
                if expired > 0 {
                    info!(expired, live = state.registry.len(), "idle sessions swept");
                }
            }
        });
    }

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/auth/device", post(routes::device_auth))
        .route("/auth/poll", post(routes::auth_poll))
        .route("/api/user", get(routes::current_user))
        .route("/api/stats", get(routes::stats))
        .route("/api/logout", post(routes::logout))
        .route("/ws", get(routes::ws_upgrade))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state))
}
