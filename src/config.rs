use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Tantivy,
    Elasticsearch,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub engine: SearchEngine,
    pub elasticsearch_url: String,
    pub tantivy_index_path: String,
    pub web_port: u16,
    pub max_body_bytes: usize,
    pub log_level: String,
    pub sync: SyncConfig,
}

/// Retry and scheduling knobs for the index sync worker.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub reconcile_on_startup: bool,
    pub reconcile_repair: bool,
}

impl SyncConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            poll_interval_ms: 1_000,
            batch_size: 64,
            reconcile_on_startup: true,
            reconcile_repair: true,
        }
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let sync = SyncConfig::default();

        let s = Config::builder()
            .set_default("database_path", "data/images.db")?
            .set_default("engine", "tantivy")?
            .set_default("elasticsearch_url", "http://localhost:9200")?
            .set_default("tantivy_index_path", "data/index")?
            .set_default("web_port", 8080)?
            .set_default("max_body_bytes", 16 * 1024 * 1024)?
            .set_default("log_level", "info")?
            .set_default("sync.max_attempts", sync.max_attempts)?
            .set_default("sync.initial_backoff_ms", sync.initial_backoff_ms)?
            .set_default("sync.max_backoff_ms", sync.max_backoff_ms)?
            .set_default("sync.poll_interval_ms", sync.poll_interval_ms)?
            .set_default("sync.batch_size", sync.batch_size as u64)?
            .set_default("sync.reconcile_on_startup", sync.reconcile_on_startup)?
            .set_default("sync.reconcile_repair", sync.reconcile_repair)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("RFID").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
