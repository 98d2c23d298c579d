use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gateway WebSocket endpoint, without the `/stream` suffix.
    pub gateway_ws: String,
    pub subject: String,
    pub durable: String,
    /// Batch size hint passed to the gateway.
    pub batch: u32,
    pub db_path: String,
    /// Maximum number of events applied per database transaction.
    pub chunk_size: usize,
    pub snapshot_id: Option<i64>,
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway_ws: "ws://localhost:8000".to_string(),
            subject: "snapfs.files".to_string(),
            durable: "sqlite".to_string(),
            batch: 100,
            db_path: "snapfs.db".to_string(),
            chunk_size: 500,
            snapshot_id: None,
            backoff_initial_secs: 1,
            backoff_max_secs: 30,
        }
    }
}

impl AppConfig {
    pub fn stream_uri(&self) -> String {
        format!(
            "{}/stream?subject={}&durable={}&batch={}",
            self.gateway_ws.trim_end_matches('/'),
            self.subject,
            self.durable,
            self.batch
        )
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Load configuration from an optional `Config` file, overridden by
/// `SNAPFS_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let defaults = AppConfig::default();
    let builder = Config::builder()
        .set_default("gateway_ws", defaults.gateway_ws)?
        .set_default("subject", defaults.subject)?
        .set_default("durable", defaults.durable)?
        .set_default("batch", defaults.batch as u64)?
        .set_default("db_path", defaults.db_path)?
        .set_default("chunk_size", defaults.chunk_size as u64)?
        .set_default("backoff_initial_secs", defaults.backoff_initial_secs)?
        .set_default("backoff_max_secs", defaults.backoff_max_secs)?
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("SNAPFS").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
