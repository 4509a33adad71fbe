//! Configuration types for the streaming engine and HTTP server.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::READ_CHUNK_SAMPLES;

/// MP3 bitrates the encoder can be configured with (kbps).
pub const SUPPORTED_BITRATES_KBPS: [u32; 8] = [64, 96, 112, 128, 160, 192, 256, 320];

/// Configuration for the broadcast pipeline.
///
/// Groups the channel capacities, idle timing and encoder settings used by
/// the streaming engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StreamingConfig {
    /// Capacity of the ingest channel, in producer frames.
    /// A full channel drops frames rather than blocking the player.
    pub ingest_capacity: usize,

    /// Capacity of the quality-change channel, in messages.
    pub quality_capacity: usize,

    /// How long the dispatcher waits for fresh audio before checking
    /// whether silence must be substituted (milliseconds).
    pub silence_interval_ms: u64,

    /// Size of one synthesized silence frame, in samples per channel.
    pub silence_frame_samples: u32,

    /// Constant MP3 bitrate (kbps).
    pub bitrate_kbps: u32,
}

impl StreamingConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ingest_capacity == 0 {
            return Err("ingest_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        if self.quality_capacity == 0 {
            return Err("quality_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        if self.silence_interval_ms == 0 {
            return Err("silence_interval_ms must be >= 1".to_string());
        }
        if self.silence_frame_samples == 0 {
            return Err("silence_frame_samples must be >= 1".to_string());
        }
        if !SUPPORTED_BITRATES_KBPS.contains(&self.bitrate_kbps) {
            return Err(format!(
                "bitrate_kbps must be one of {:?}, got {}",
                SUPPORTED_BITRATES_KBPS, self.bitrate_kbps
            ));
        }
        Ok(())
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: 64,
            quality_capacity: 8,
            silence_interval_ms: 1000,
            silence_frame_samples: READ_CHUNK_SAMPLES,
            bitrate_kbps: 128,
        }
    }
}

/// Configuration for the tidecast server.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Port for the HTTP server.
    pub preferred_port: u16,

    /// Library name, announced to ICY listeners as `icy-name`.
    pub library_name: String,

    /// Broadcast pipeline settings.
    pub streaming: StreamingConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.library_name.contains(['\r', '\n']) {
            return Err("library_name must not contain line breaks".to_string());
        }
        self.streaming.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 3689,
            library_name: "My Music".to_string(),
            streaming: StreamingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = StreamingConfig {
            ingest_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsupported_bitrate_is_rejected() {
        let config = StreamingConfig {
            bitrate_kbps: 100,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("bitrate_kbps"));
    }

    #[test]
    fn library_name_with_newline_is_rejected() {
        let config = Config {
            library_name: "evil\r\nX-Injected: 1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"library_name":"Den"}"#).unwrap();
        assert_eq!(config.library_name, "Den");
        assert_eq!(config.streaming.silence_interval_ms, 1000);
    }
}
