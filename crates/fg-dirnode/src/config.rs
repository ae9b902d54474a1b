//! Configuration management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fg_proto::v1::MAX_FETCH_LIMIT;
use fg_proto::validation::MAX_PAYLOAD_SIZE;

use crate::adverts::AdvertPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
    pub max_payload_size: usize,
    pub max_fetch_limit: u32,
    pub advert_policy: String, // "arrival_order", "newest_timestamp"
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8666)),
            database_path: PathBuf::from("fieldgrid.db"),
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_fetch_limit: MAX_FETCH_LIMIT,
            advert_policy: "arrival_order".to_string(),
        }
    }
}

impl ServerConfig {
    /// Effective configuration: the TOML file named by
    /// `FIELDGRID_DIRNODE_CONFIG` (or `base` without one), then `FIELDGRID_*`
    /// environment overrides
    pub fn load(base: Self) -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FIELDGRID_DIRNODE_CONFIG") {
            Ok(path) => Self::from_toml(path)?,
            Err(_) => base,
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML config file; missing keys keep their defaults
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override fields from `FIELDGRID_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = std::env::var("FIELDGRID_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr: {}", e)))?;
        }

        if let Ok(path) = std::env::var("FIELDGRID_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }

        if let Ok(size) = std::env::var("FIELDGRID_MAX_PAYLOAD_SIZE") {
            self.max_payload_size = size
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid max_payload_size: {}", e)))?;
        }

        if let Ok(limit) = std::env::var("FIELDGRID_MAX_FETCH_LIMIT") {
            self.max_fetch_limit = limit
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid max_fetch_limit: {}", e)))?;
        }

        if let Ok(policy) = std::env::var("FIELDGRID_ADVERT_POLICY") {
            self.advert_policy = policy;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_size == 0 {
            return Err(ConfigError::Invalid("max_payload_size must be > 0".to_string()));
        }

        if self.max_fetch_limit == 0 {
            return Err(ConfigError::Invalid("max_fetch_limit must be > 0".to_string()));
        }

        self.advert_policy()?;
        Ok(())
    }

    /// Parsed advertisement conflict policy
    pub fn advert_policy(&self) -> Result<AdvertPolicy, ConfigError> {
        self.advert_policy.parse().map_err(ConfigError::Invalid)
    }
}
