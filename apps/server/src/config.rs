//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tidecast_core::StreamingConfig;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 picks a free port).
    /// Override: `TIDECAST_BIND_PORT`
    pub bind_port: u16,

    /// Library name announced to ICY listeners.
    /// Override: `TIDECAST_LIBRARY_NAME`
    pub library_name: String,

    /// Broadcast pipeline settings.
    pub streaming: StreamingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = tidecast_core::Config::default();
        Self {
            bind_port: core.preferred_port,
            library_name: core.library_name,
            streaming: core.streaming,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TIDECAST_LIBRARY_NAME") {
            self.library_name = val;
        }

        if let Ok(val) = std::env::var("TIDECAST_BITRATE_KBPS") {
            if let Ok(bitrate) = val.parse() {
                self.streaming.bitrate_kbps = bitrate;
            }
        }

        if let Ok(val) = std::env::var("TIDECAST_SILENCE_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.streaming.silence_interval_ms = interval;
            }
        }

        // Note: TIDECAST_BIND_PORT is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to tidecast-core's Config type.
    pub fn to_core_config(&self) -> tidecast_core::Config {
        tidecast_core::Config {
            preferred_port: self.bind_port,
            library_name: self.library_name.clone(),
            streaming: self.streaming.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_port, 3689);
        assert_eq!(config.library_name, "My Music");
        assert_eq!(config.streaming.bitrate_kbps, 128);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_port: 8000\nstreaming:\n  silence_interval_ms: 250\n  bitrate_kbps: 192"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_port, 8000);
        assert_eq!(config.streaming.bitrate_kbps, 192);
        assert_eq!(config.streaming.silence_interval_ms, 250);
        // Unset nested fields keep their defaults
        assert_eq!(config.streaming.ingest_capacity, 64);
    }

    #[test]
    fn unreadable_file_reports_path() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/tidecast.yaml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tidecast.yaml"));
    }

    #[test]
    fn core_config_carries_every_field() {
        let config = ServerConfig {
            bind_port: 0,
            library_name: "Den".to_string(),
            ..Default::default()
        };
        let core = config.to_core_config();
        assert_eq!(core.preferred_port, 0);
        assert_eq!(core.library_name, "Den");
        assert!(core.validate().is_ok());
    }
}
