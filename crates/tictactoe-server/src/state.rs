use std::sync::atomic::{AtomicU32, AtomicU64};

use dashmap::DashMap;
use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;

/// A device-flow login waiting to be polled, keyed by user code.
#[derive(Debug, Clone)]
pub enum PendingLogin {
    /// Completes on first poll with a fresh local account.
    Dev { username: String },
    GitHub { device_code: String },
}

/// Shared application state.
pub struct AppState {
    pub db: SqlitePool,
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub pending_logins: DashMap<String, PendingLogin>,
    /// Numbering for dev-mode accounts.
    pub dev_counter: AtomicU64,
    pub connection_count: AtomicU32,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServerConfig) -> Self {
        Self {
            db,
            config,
            registry: SessionRegistry::new(),
            pending_logins: DashMap::new(),
            dev_counter: AtomicU64::new(1),
            connection_count: AtomicU32::new(0),
            http: reqwest::Client::new(),
        }
    }
}
