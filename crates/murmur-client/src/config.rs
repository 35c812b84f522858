use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use murmur_gateway::{ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, ReconnectPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub token: String,
    pub db_path: PathBuf,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl Config {
    /// Read `MURMUR_*` variables. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ReconnectPolicy::default();

        let base_delay = match get("MURMUR_RECONNECT_BASE_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse().context("MURMUR_RECONNECT_BASE_MS must be a number")?,
            ),
            None => defaults.base_delay,
        };
        let max_attempts = match get("MURMUR_RECONNECT_MAX_ATTEMPTS") {
            Some(n) => n
                .parse()
                .context("MURMUR_RECONNECT_MAX_ATTEMPTS must be a number")?,
            None => defaults.max_attempts,
        };
        let connect_timeout = match get("MURMUR_CONNECT_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse().context("MURMUR_CONNECT_TIMEOUT_MS must be a number")?,
            ),
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        Ok(Self {
            api_url: get("MURMUR_API_URL").unwrap_or_else(|| "http://localhost:8080".into()),
            ws_url: get("MURMUR_WS_URL").unwrap_or_else(|| "ws://localhost:8080/ws/chat".into()),
            token: get("MURMUR_TOKEN").context("MURMUR_TOKEN is not set")?,
            db_path: get("MURMUR_DB_PATH")
                .unwrap_or_else(|| "murmur-keys.db".into())
                .into(),
            reconnect: ReconnectPolicy {
                base_delay,
                max_attempts,
            },
            connect_timeout,
        })
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            reconnect: self.reconnect,
            connect_timeout: self.connect_timeout,
        }
    }
}
