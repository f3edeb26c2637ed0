use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings, read from the environment by the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub static_dir: String,
    pub max_connections: u32,
    pub max_messages_per_second: u32,
    pub session_idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// `None` runs the login flow in dev mode.
    pub github_client_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "sqlite:tictactoe.db?mode=rwc".to_string(),
            static_dir: "static".to_string(),
            max_connections: 200,
            max_messages_per_second: 20,
            session_idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(30),
            github_client_id: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            static_dir: lookup("STATIC_DIR").unwrap_or(defaults.static_dir),
            max_connections: positive(&lookup, "MAX_CONNECTIONS", defaults.max_connections)?,
            max_messages_per_second: positive(
                &lookup,
                "MAX_MESSAGES_PER_SECOND",
                defaults.max_messages_per_second,
            )?,
            session_idle_timeout: Duration::from_secs(parse(
                &lookup,
                "SESSION_IDLE_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(positive(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            github_client_id: lookup("GITHUB_CLIENT_ID").filter(|id| !id.is_empty()),
        })
    }

    pub fn is_dev_mode(&self) -> bool {
        self.github_client_id.is_none()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Like `parse`, but zero is rejected.
fn positive<T: FromStr + Default + PartialEq + ToString>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse(lookup, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}
