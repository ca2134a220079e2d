//! Configuration management for Huddle Server

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub calls: CallsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
}

/// External real-time media infrastructure the server issues join
/// credentials for. The service itself (room creation, media routing)
/// is not managed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub enabled: bool,
    pub url: String,
    pub token_secret: String,
    pub token_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsConfig {
    /// How long a call may stay in `ringing` before the sweep marks the
    /// remaining participants missed.
    pub ring_timeout_seconds: u64,
    /// Interval of the background missed-call sweep.
    pub sweep_interval_seconds: u64,
}

impl Config {
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).await?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            let content = toml::to_string_pretty(&config)?;
            fs::write(path, content).await?;
            tracing::info!("Created default config at {}", path);
            Ok(config)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 9444,
            },
            storage: StorageConfig {
                database_path: "./data/huddle.db".to_string(),
            },
            media: MediaConfig {
                enabled: true,
                url: "https://media.example.com".to_string(),
                token_secret: "change-this-secret".to_string(),
                token_ttl_seconds: 14400, // 4 hours
            },
            calls: CallsConfig {
                ring_timeout_seconds: 60,
                sweep_interval_seconds: 30,
            },
        }
    }
}
