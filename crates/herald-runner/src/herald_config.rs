use std::fs;
use std::path::{Path, PathBuf};

use herald_messaging::BusConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::paths::ProjectPaths;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Could not determine the config directory")]
    NoConfigDir,
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("IO error on config file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to <data dir>/logs/<component>.log
    #[serde(default)]
    pub file: bool,

    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: false,
            filter: default_filter(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

pub const EXAMPLE_CONFIG: &str = r#"# Herald configuration

[bus]
# Report handler panics instead of unwinding through send
isolate_panics = true
# Warn when a single handler takes longer than this
slow_handler_warn_ms = 50

[logging]
file = false
filter = "info"
"#;

impl HeraldConfig {
    /// Default location: <config dir>/herald/config.toml
    pub fn config_path() -> Option<PathBuf> {
        ProjectPaths::new("herald").map(|p| p.config_dir().join("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = Self::config_path().ok_or(ConfigLoadError::NoConfigDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!(target: "herald", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigLoadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        info!(target: "herald", "Saved config to {}", path.display());
        Ok(())
    }

    /// Write the commented example config, creating parent directories
    pub fn write_example(path: &Path) -> Result<(), ConfigLoadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, EXAMPLE_CONFIG)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: HeraldConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        assert!(config.bus.isolate_panics);
        assert_eq!(config.bus.slow_handler_warn_ms, Some(50));
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_missing_sections_default() {
        let config: HeraldConfig = toml::from_str("[logging]\nfile = true\n").unwrap();
        assert_eq!(config.bus, BusConfig::default());
        assert!(config.logging.file);
        assert_eq!(config.logging.filter, "info");
    }
}
