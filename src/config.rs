use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::session::SessionStore;

/// Default tracing filter when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "docops=info";

/// Top-level config, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sessions: SessionsConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

/// `[sessions]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Cap on concurrently open sessions. 0 disables the cap.
    pub max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: SessionStore::DEFAULT_MAX_SESSIONS,
        }
    }
}

impl SessionsConfig {
    pub fn limit(&self) -> Option<usize> {
        (self.max_sessions > 0).then_some(self.max_sessions)
    }
}

/// `[paths]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directories that document paths must live under. Empty allows any path.
    pub allowed_roots: Vec<PathBuf>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `docops=debug`.
    pub filter: Option<String>,
}

impl Config {
    /// Default config location: `$CONFIG_DIR/docops/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("docops").join("config.toml"))
    }

    /// Load config from a TOML file path. Returns None if the file doesn't exist.
    ///
    /// Permissions are not checked here; call [`check_config_permissions`]
    /// once logging is up.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate(path)?;
        Ok(Some(config))
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        for root in &self.paths.allowed_roots {
            if !root.is_absolute() {
                return Err(ConfigError::Invalid(
                    path.to_path_buf(),
                    format!("allowed root '{}' must be an absolute path", root.display()),
                ));
            }
        }
        Ok(())
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {1}", .0.display())]
    ReadFailed(PathBuf, std::io::Error),
    #[error("Failed to parse config {}: {1}", .0.display())]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("Invalid config {}: {1}", .0.display())]
    Invalid(PathBuf, String),
}

/// Warn if the config file is writable by other users (it controls
/// `allowed_roots`).
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    let mode = metadata.permissions().mode();
    if is_world_writable(mode) {
        tracing::warn!(
            "Config file {} is world-writable (mode {:o}); consider restricting permissions to 644.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

/// Pure mode check, split out for testing.
#[cfg(unix)]
pub fn is_world_writable(mode: u32) -> bool {
    mode & 0o002 != 0
}
