//! Node configuration
//!
//! Loaded from a TOML file (`--config` or the platform config directory),
//! then overridden by command-line flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fg_dirnode::ServerConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Which half of the protocol this unit runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Directory and relay for other units
    Server,
    /// Unit that advertises itself and polls its inbox
    #[default]
    Peer,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "peer" => Ok(Self::Peer),
            _ => Err(format!("Unknown role: {s}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Peer => write!(f, "peer"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Identity and directory location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default)]
    pub role: Role,

    /// Directory base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Directory holding the keypair (empty = depends on the command)
    #[serde(default)]
    pub keys_path: Option<PathBuf>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8666".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: Role::default(),
            endpoint: default_endpoint(),
            keys_path: None,
        }
    }
}

/// Peer loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Where the inbox checkpoint lives (empty = next to the keys)
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    /// Advertised display name
    #[serde(default)]
    pub name: Option<String>,

    /// Extra advertised capability metadata
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            checkpoint_path: None,
            name: None,
            capabilities: serde_json::Map::new(),
        }
    }
}

impl PeerConfig {
    /// Capabilities as advertised, with `name` folded in when set
    pub fn advert_capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut capabilities = self.capabilities.clone();
        if let Some(name) = &self.name {
            capabilities.insert("name".to_string(), name.clone().into());
        }
        capabilities
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// CLI overrides for configuration values; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub role: Option<Role>,
    pub endpoint: Option<String>,
    pub keys_path: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub log_level: Option<String>,
}

impl NodeConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    /// Platform config file: `~/.config/fieldgrid/node.toml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "fieldgrid", "fieldgrid")
            .map(|dirs| dirs.config_dir().join("node.toml"))
    }

    /// Apply CLI overrides; flags win over file values
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(role) = overrides.role {
            self.node.role = role;
        }
        if let Some(endpoint) = &overrides.endpoint {
            self.node.endpoint = endpoint.clone();
        }
        if let Some(keys_path) = &overrides.keys_path {
            self.node.keys_path = Some(keys_path.clone());
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.peer.poll_interval_secs = secs;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.node.endpoint.as_str();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid endpoint '{}': must start with http:// or https://",
                endpoint
            )));
        }

        if self.peer.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }

        self.server
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("[server] {e}")))
    }

    /// Public profile of a unit on the configured directory
    pub fn profile_url(&self, fingerprint: &str) -> String {
        format!("{}/v1/units/{}", self.node.endpoint.trim_end_matches('/'), fingerprint)
    }

    /// Checkpoint file for the peer loop
    pub fn checkpoint_path(&self, keys_dir: &Path) -> PathBuf {
        self.peer
            .checkpoint_path
            .clone()
            .unwrap_or_else(|| keys_dir.join("inbox.checkpoint.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.node.role, Role::Peer);
        assert_eq!(config.peer.poll_interval_secs, 10);
        assert!(config.node.keys_path.is_none());
    }

    #[test]
    fn test_load_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
role = "server"
endpoint = "https://grid.example.org"
keys_path = "/var/lib/fieldgrid/keys"

[peer]
poll_interval_secs = 30
name = "rover-7"

[peer.capabilities]
sensors = ["lidar", "gps"]
battery = 87

[logging]
level = "debug"

[server]
listen_addr = "127.0.0.1:9000"
advert_policy = "newest_timestamp"
"#
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.node.role, Role::Server);
        assert_eq!(config.node.endpoint, "https://grid.example.org");
        assert_eq!(config.node.keys_path, Some(PathBuf::from("/var/lib/fieldgrid/keys")));
        assert_eq!(config.peer.poll_interval_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000".parse().unwrap());
        // Omitted server fields keep their defaults
        assert_eq!(config.server.max_fetch_limit, ServerConfig::default().max_fetch_limit);

        let caps = config.peer.advert_capabilities();
        assert_eq!(caps["name"], "rover-7");
        assert_eq!(caps["battery"], 87);
        assert_eq!(caps["sensors"][1], "gps");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = NodeConfig::default();
        config.node.endpoint = "grid.example.org".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = NodeConfig::default();
        config.peer.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.server.advert_policy = "vector_clock".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = CliOverrides {
            role: Some(Role::Server),
            endpoint: Some("http://10.0.0.2:8666".to_string()),
            keys_path: Some(PathBuf::from("/tmp/keys")),
            poll_interval_secs: Some(2),
            log_level: None,
        };
        let config = NodeConfig::default().with_overrides(&overrides);
        assert_eq!(config.node.role, Role::Server);
        assert_eq!(config.node.endpoint, "http://10.0.0.2:8666");
        assert_eq!(config.node.keys_path, Some(PathBuf::from("/tmp/keys")));
        assert_eq!(config.peer.poll_interval_secs, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_profile_url_and_checkpoint_path() {
        let mut config = NodeConfig::default();
        config.node.endpoint = "https://grid.example.org/".to_string();
        assert_eq!(
            config.profile_url("ab12"),
            "https://grid.example.org/v1/units/ab12"
        );
        assert_eq!(
            config.checkpoint_path(Path::new("/keys")),
            PathBuf::from("/keys/inbox.checkpoint.json")
        );

        config.peer.checkpoint_path = Some(PathBuf::from("/state/cp.json"));
        assert_eq!(config.checkpoint_path(Path::new("/keys")), PathBuf::from("/state/cp.json"));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("server".parse::<Role>().unwrap(), Role::Server);
        assert_eq!("PEER".parse::<Role>().unwrap(), Role::Peer);
        assert!("relay".parse::<Role>().is_err());
        assert_eq!(Role::Server.to_string(), "server");
    }
}
