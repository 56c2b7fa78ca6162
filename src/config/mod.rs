//! Configuration management for Tributary.
//!
//! Configuration is read from `~/.config/tributary/config.toml` at startup,
//! or from the path given with `--config`. If the file doesn't exist, a
//! default configuration with comments is created.

mod interval;

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub use interval::Interval;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server listens on.
    pub bind: String,
    /// Public URL of this server; WebSub callbacks are built from it.
    pub base_url: String,
    /// Bearer token required on `/microsub`. Empty disables the check.
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            base_url: "http://localhost:8080".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Defaults to the platform data directory.
    pub database: Option<PathBuf>,
    /// Timeline backend for channels that don't name one.
    pub default_backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            default_backend: "sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Time between sweeps.
    pub interval: Interval,
    /// Run a sweep as soon as the server starts.
    pub on_start: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Interval::from_secs(3600),
            on_start: true,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, creating a commented default there
    /// when it doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::create_default_config(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/tributary/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("tributary").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# Tributary configuration

[server]
# Address the HTTP server binds to
bind = "127.0.0.1:8080"

# Public base URL; WebSub hubs deliver to <base_url>/incoming/<feed id>
base_url = "http://localhost:8080"

# Bearer token required on /microsub (leave unset to allow every request)
# auth_token = "change-me"

[storage]
# SQLite database file (default: platform data directory)
# database = "/var/lib/tributary/tributary.db"

# Timeline backend for channels without their own: sorted-set, stream, sqlite, null
default_backend = "sqlite"

[refresh]
# How often every feed is polled: e.g. "90s", "30m", "1h30m", "1d"
interval = "1h"

# Poll all feeds immediately on start
on_start = true
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let config: Config =
            toml::from_str(Config::default_config_content()).expect("Default config should be valid TOML");

        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.auth_token, None);
        assert_eq!(config.storage.default_backend, "sqlite");
        assert_eq!(config.refresh.interval, Interval::from_secs(3600));
        assert!(config.refresh.on_start);
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[storage]
default_backend = "sorted-set"
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.storage.default_backend, "sorted-set");
        assert_eq!(config.server.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.refresh.interval, Interval::from_secs(3600));

        fs::write(&path, "[refresh]\ninterval = \"30m\"\non_start = false\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.refresh.interval, Interval::from_secs(1800));
        assert!(!config.refresh.on_start);
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server\nbind = 1").unwrap();

        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));

        fs::write(&path, "[refresh]\ninterval = \"0s\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));
    }
}
