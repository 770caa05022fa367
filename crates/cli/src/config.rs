//! Command-line configuration management

use anyhow::{Context, Result, anyhow};
use mux::SessionSettings;
use protocol::{DEFAULT_MAX_DEVICES, MAX_SLOT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// USB redirection settings for each session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Honour USB connect, data and disconnect events
    #[serde(default = "UsbSettings::default_enabled")]
    pub enabled: bool,
    /// Number of device slots per session (1-100)
    #[serde(default = "UsbSettings::default_max_devices")]
    pub max_devices: usize,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_devices: Self::default_max_devices(),
        }
    }
}

impl UsbSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_max_devices() -> usize {
        DEFAULT_MAX_DEVICES
    }
}

impl From<&UsbSettings> for SessionSettings {
    fn from(usb: &UsbSettings) -> Self {
        SessionSettings {
            usb_enabled: usb.enabled,
            max_devices: usb.max_devices,
        }
    }
}

impl CliConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = [
                Self::default_path(),
                PathBuf::from("/etc/urbdrc-mux/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("urbdrc-mux").join("config.toml")
        } else {
            PathBuf::from(".config/urbdrc-mux/config.toml")
        }
    }

    /// Settings for a new session
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from(&self.usb)
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if !(1..=MAX_SLOT_CAPACITY).contains(&self.usb.max_devices) {
            return Err(anyhow!(
                "Invalid max_devices {}, must be between 1 and {}",
                self.usb.max_devices,
                MAX_SLOT_CAPACITY
            ));
        }

        Ok(())
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(config.usb.enabled);
        assert_eq!(config.usb.max_devices, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CliConfig = toml::from_str("[usb]\nmax_devices = 4\n").unwrap();
        assert_eq!(config.usb.max_devices, 4);
        assert!(config.usb.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = CliConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_devices() {
        let mut config = CliConfig::default();
        config.usb.max_devices = 0;
        assert!(config.validate().is_err());

        config.usb.max_devices = 101;
        assert!(config.validate().is_err());

        config.usb.max_devices = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.usb.enabled = false;
        config.usb.max_devices = 2;
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(path)).unwrap();
        assert!(!loaded.usb.enabled);
        assert_eq!(loaded.usb.max_devices, 2);

        let settings = loaded.session_settings();
        assert!(!settings.usb_enabled);
        assert_eq!(settings.max_devices, 2);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[usb]\nmax_devices = 500\n").unwrap();

        let err = CliConfig::load(Some(path)).unwrap_err();
        assert!(err.to_string().contains("max_devices"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(CliConfig::load(Some(dir.path().join("absent.toml"))).is_err());
    }
}
